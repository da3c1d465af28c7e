//! Substituter - composite compendia for reproducible research
//!
//! Takes a base compendium and an overlay compendium and produces a new
//! candidate compendium in which chosen overlay files stand in for base files:
//! the overlay content is copied into the new tree, the execution recipe
//! mounts it read-only over the base file's container path, and the base
//! metadata is re-homed under the new identifier.
//!
//! ## Layout
//!
//! - **services**: the substitution orchestrator
//! - **storage**: compendium record and file tree collaborators
//! - **db**: MongoDB-backed compendium records
//! - **routes** / **server**: the HTTP boundary

pub mod config;
pub mod db;
pub mod routes;
pub mod server;
pub mod services;
pub mod storage;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use services::SubstitutionService;
pub use types::{Result, SubstituterError};
