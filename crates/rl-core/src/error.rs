//! # AppError
//!
//! Centralized error handling for the Rapline ecosystem.
//! Every port trait reports failures through this type so the API layer can
//! map each kind to its own HTTP status.

use thiserror::Error;

/// The primary error type for all rl-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., User, Post)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Malformed request body, missing field, or unparsable identifier
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Resource already exists (e.g., duplicate user name)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Document store failure (query error, lost connection, deadline hit)
    #[error("storage failure: {0}")]
    Storage(String),

    /// Upload stream could not be read or written to disk
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// Upload exceeded the configured byte cap
    #[error("payload too large: limit is {0} bytes")]
    PayloadTooLarge(u64),

    /// Anything else (e.g., password hashing failure)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(format!("document encoding: {err}"))
    }
}

/// A specialized Result type for Rapline logic.
pub type Result<T> = std::result::Result<T, AppError>;
