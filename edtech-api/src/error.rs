//! Error types for edtech-api
//!
//! Maps every failure to a machine-readable code and a message safe to
//! show callers. Storage details are logged server-side, never returned.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or wrong API key (401); message is fixed so callers cannot
    /// distinguish malformed from wrong credentials
    #[error("Invalid or missing API key")]
    Auth,

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Decision already recorded (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller exceeded its token bucket (429)
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// Ledger unavailable (503); detail is logged, not returned
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// edtech-common error, mapped per variant
    #[error("{0}")]
    Common(#[from] edtech_common::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Storage(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Flatten common errors into their API equivalents first
        let flattened = match self {
            ApiError::Common(err) => match err {
                edtech_common::Error::Validation(msg) => ApiError::Validation(msg),
                edtech_common::Error::NotFound(msg) => ApiError::NotFound(msg),
                edtech_common::Error::Conflict(msg) => ApiError::Conflict(msg),
                edtech_common::Error::Database(e) => ApiError::Storage(e.to_string()),
                other => ApiError::Internal(other.to_string()),
            },
            other => other,
        };

        let (status, error_code, message, retry_after) = match flattened {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION", msg, None),
            ApiError::Auth => (
                StatusCode::UNAUTHORIZED,
                "AUTH",
                "Invalid or missing API key".to_string(),
                None,
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            ApiError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded".to_string(),
                Some(retry_after_secs),
            ),
            ApiError::Storage(detail) => {
                error!("Storage failure: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORAGE",
                    "Ledger temporarily unavailable".to_string(),
                    None,
                )
            }
            ApiError::Internal(detail) => {
                error!("Internal failure: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "Internal server error".to_string(),
                    None,
                )
            }
            ApiError::Common(_) => unreachable!("flattened above"),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
