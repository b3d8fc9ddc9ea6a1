//! Error types for directory operations.
//!
//! Configuration and protocol-shape problems are surfaced as errors. Data-quality problems
//! found while reading directory records (a malformed lockout timestamp, a nested group that
//! no longer exists) are not errors and are handled where they are read.

use thiserror::Error;

/// Main error type for Cratus operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A required connection or search option is missing or invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A directory operation was attempted before a successful bind
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The search scope name is not recognised
    #[error("Invalid search scope: {0}")]
    InvalidScope(String),

    /// The directory returned no result object for a search
    #[error("Directory search failed: {0}")]
    SearchFailed(String),

    /// A membership mutation was given something that is not a directory entry
    #[error("Invalid user: {0}")]
    InvalidUser(String),

    /// The requested entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request or directory data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Operation timed out
    #[error("Timeout waiting for directory: {0}")]
    Timeout(String),

    /// Invalid endpoint
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// External service error
    #[error("External service error: {service}: {message}")]
    ExternalServiceError {
        /// Service name that failed
        service: String,
        /// Error message
        message: String,
    },
}

/// Specialized result type for Cratus operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::NotConnected(_) => "NOT_CONNECTED",
            Self::InvalidScope(_) => "INVALID_SCOPE",
            Self::SearchFailed(_) => "SEARCH_FAILED",
            Self::InvalidUser(_) => "INVALID_USER",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::ExternalServiceError { .. } => "EXTERNAL_SERVICE_ERROR",
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_) | Self::SearchFailed(_) | Self::ExternalServiceError { .. }
        )
    }
}

// Conversions from external error types
impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}
