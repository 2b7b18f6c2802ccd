//! Common error types for the edtech network services

use thiserror::Error;

/// Common result type for edtech service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the edtech services
///
/// Each variant maps to exactly one HTTP status at the API boundary, so
/// lower layers can signal outcomes without knowing about HTTP.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or unprocessable caller input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation conflicts with existing immutable state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Inference backend unreachable or produced unusable output
    #[error("Inference error: {0}")]
    Inference(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
