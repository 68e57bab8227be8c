//! Error types for market research
//!
//! `MrError` is what services return; `ApiError` is its HTTP face.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ldk_common::api::ErrorBody;
use thiserror::Error;

use crate::source::SourceError;

#[derive(Debug, Error)]
pub enum MrError {
    #[error(transparent)]
    Common(#[from] ldk_common::Error),

    /// Comparable listing source failed
    #[error("Comparable source failed: {0}")]
    Source(#[from] SourceError),

    #[error("Job '{0}' is already running")]
    AlreadyRunning(String),
}

impl From<sqlx::Error> for MrError {
    fn from(err: sqlx::Error) -> Self {
        MrError::Common(ldk_common::Error::Database(err))
    }
}

pub type MrResult<T> = Result<T, MrError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// 400
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// 409
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 502, the comparable source failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// 500
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ldk_common::Error> for ApiError {
    fn from(err: ldk_common::Error) -> Self {
        use ldk_common::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<MrError> for ApiError {
    fn from(err: MrError) -> Self {
        match err {
            MrError::Common(e) => ApiError::from(e),
            MrError::Source(e) => ApiError::Upstream(e.to_string()),
            e @ MrError::AlreadyRunning(_) => ApiError::Conflict(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::from(ldk_common::Error::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, "upstream_error", msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        (status, Json(ErrorBody::new(code, message))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
