//! Database schemas for the substituter
//!
//! Compendium documents are shared with the compendium service, which owns
//! the collection; the substituter only reads bases and inserts composites.

mod compendium;
mod timestamps;

pub use compendium::{CompendiumDoc, COMPENDIUM_COLLECTION};
pub use timestamps::Timestamps;
