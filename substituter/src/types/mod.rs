//! Shared types for the substituter

pub mod error;

pub use error::{Result, SubstituterError, MISSING_CONFIGURATION_MESSAGE};
