//! Error types for the core domain.

use thiserror::Error;

/// Errors raised by core domain parsing and validation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A value did not look like an application token.
    #[error("invalid application token: {0}")]
    InvalidToken(String),

    /// A job envelope could not be mapped to a known job.
    #[error("invalid job envelope: {0}")]
    Envelope(String),

    /// JSON decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for core results.
pub type Result<T> = std::result::Result<T, CoreError>;
