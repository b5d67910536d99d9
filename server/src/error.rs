//! Policy Error Types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;

/// Outcome of a rejected policy operation.
///
/// Domain failures are distinct variants so callers can react to each one.
/// Anything raised by a collaborator (database, cache, file storage) is
/// folded into [`PolicyError::Infrastructure`].
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Entity absent, or in the wrong lifecycle state for the operation.
    #[error("Resource not found")]
    NotFound,

    #[error("Access forbidden: {0}")]
    Forbidden(String),

    #[error("Restore window expired (deleted at {deleted_at})")]
    ExpiredWindow { deleted_at: DateTime<Utc> },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl PolicyError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict(reason.into())
    }
}

impl From<sqlx::Error> for PolicyError {
    fn from(e: sqlx::Error) -> Self {
        Self::Infrastructure(e.into())
    }
}

impl IntoResponse for PolicyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            Self::ExpiredWindow { .. } => (StatusCode::GONE, self.to_string()),
            Self::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Infrastructure(e) => {
                tracing::error!(error = %e, "Policy engine infrastructure error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
