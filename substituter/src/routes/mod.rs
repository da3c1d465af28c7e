//! HTTP routes for the substituter

pub mod health;
pub mod substitution;

pub use health::{health_check, status_check};
pub use substitution::{create_substitution, error_response, json_response, list_substitutions};
