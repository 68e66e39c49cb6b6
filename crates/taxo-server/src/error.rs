use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use taxo_storage::StorageError;

/// Failure of a single cache / counter backend call.
///
/// These never reach a client: the cache and rate-limit layers turn them
/// into a neutral outcome (miss, unknown usage, nothing evicted).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("cache backend is disabled")]
    Disabled,

    #[error("failed to get Redis connection: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("backend {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("key {key} holds the wrong kind of value")]
    WrongType { key: String },

    #[error("invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl BackendError {
    /// Disabled is the configured state, not a fault worth a warning.
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

/// Error type of the route handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Storage(e) if e.is_already_exists() => StatusCode::CONFLICT,
            Self::Storage(StorageError::InvalidDocument { .. }) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Storage(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %e, category = %e.category(), "storage failure");
                "Something went wrong".to_string()
            }
            Self::Storage(e) => e.to_string(),
            other => other.to_string(),
        };
        (
            status,
            Json(json!({
                "status": "error",
                "message": message,
            })),
        )
            .into_response()
    }
}
