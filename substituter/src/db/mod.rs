//! MongoDB persistence for compendium records

pub mod mongo;
pub mod schemas;
pub mod store;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutTimestamps};
pub use store::MongoStore;
