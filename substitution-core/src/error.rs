//! Error types for the substitution core

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// `execution.cmd` is absent or cannot be parsed as a command line
    #[error("missing or unparsable execution recipe: {0}")]
    MissingRecipe(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unsupported metadata handling: {0}")]
    UnsupportedPolicy(String),
}
