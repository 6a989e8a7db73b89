use crate::storage::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Failures surfaced by the bucket, tree, pagination and transfer services.
#[derive(Debug, Error)]
pub enum HarborError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0} is not empty")]
    NotEmpty(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("range not satisfiable: {0}")]
    RangeNotSatisfiable(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("storage backend error: {0}")]
    Backend(#[from] StorageError),
    #[error("metadata error: {0}")]
    Metadata(#[from] sqlx::Error),
}

pub type HarborResult<T> = Result<T, HarborError>;

impl HarborError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<HarborError> for AppError {
    fn from(err: HarborError) -> Self {
        let status = match &err {
            HarborError::NotFound(_) => StatusCode::NOT_FOUND,
            HarborError::Conflict(_) | HarborError::NotEmpty(_) => StatusCode::CONFLICT,
            HarborError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            HarborError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            HarborError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            HarborError::Backend(_) | HarborError::Metadata(_) => {
                error!("request failed: {err}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        let cases = [
            (HarborError::not_found("bucket `a`"), StatusCode::NOT_FOUND),
            (HarborError::conflict("dup"), StatusCode::CONFLICT),
            (HarborError::NotEmpty("dir".into()), StatusCode::CONFLICT),
            (HarborError::invalid("bad"), StatusCode::BAD_REQUEST),
            (
                HarborError::RangeNotSatisfiable("bytes=9-1".into()),
                StatusCode::RANGE_NOT_SATISFIABLE,
            ),
            (
                HarborError::PermissionDenied("no".into()),
                StatusCode::FORBIDDEN,
            ),
            (
                HarborError::Backend(StorageError::Connection("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                HarborError::Metadata(sqlx::Error::RowNotFound),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn not_found_message_names_the_subject() {
        let err = AppError::from(HarborError::not_found("bucket `photos`"));
        assert_eq!(err.message, "bucket `photos` not found");
    }
}
