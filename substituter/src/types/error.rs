//! Error types for the substituter

use hyper::StatusCode;
use substitution_core::CoreError;

/// Message returned when the base compendium has no execution recipe.
/// Clients match on this text.
pub const MISSING_CONFIGURATION_MESSAGE: &str =
    "missing configuration file in base compendium, please execute a job for the base compendium first";

/// Main error type for substitution operations
#[derive(Debug, thiserror::Error)]
pub enum SubstituterError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{}", MISSING_CONFIGURATION_MESSAGE)]
    MissingConfiguration,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported metadata handling: {0}")]
    UnsupportedPolicy(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SubstituterError {
    /// Convert error to HTTP status code.
    ///
    /// Every failure the request itself causes, an unknown compendium
    /// included, is answered with 400.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::BAD_REQUEST,
            Self::MissingConfiguration => StatusCode::BAD_REQUEST,
            Self::InvalidPath(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedPolicy(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() }).to_string();
        (status, body)
    }
}

impl From<CoreError> for SubstituterError {
    fn from(err: CoreError) -> Self {
        match err {
            // Same failure whether caught before or during recipe mutation
            CoreError::MissingRecipe(_) => Self::MissingConfiguration,
            CoreError::InvalidPath(msg) => Self::InvalidPath(msg),
            CoreError::UnsupportedPolicy(msg) => Self::UnsupportedPolicy(msg),
        }
    }
}

impl From<std::io::Error> for SubstituterError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SubstituterError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for SubstituterError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for SubstituterError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for substituter operations
pub type Result<T> = std::result::Result<T, SubstituterError>;
