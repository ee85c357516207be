//! Application error types and HTTP wire mapping.
//!
//! Every failure crossing a module seam is an [`AppError`]. The wire contract
//! is a single `{"error": "<message>"}` object: validation and processing
//! failures answer with HTTP 400, authentication with 401, and only internal
//! faults (worker join failures) with 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error model used throughout request parsing, storage, and inference.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    BadMultipart(String),
    #[error("{0}")]
    UnsupportedMedia(String),
    #[error("voiceprint not registered")]
    NotRegistered,
    #[error("{0}")]
    Storage(String),
    #[error("{0}")]
    Model(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Creates a `401 Unauthorized` error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates a request validation error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates a multipart parsing/shape error.
    pub fn bad_multipart(message: impl Into<String>) -> Self {
        Self::BadMultipart(message.into())
    }

    /// Creates an unsupported upload format error.
    pub fn unsupported_media(message: impl Into<String>) -> Self {
        Self::UnsupportedMedia(message.into())
    }

    /// Creates an object-storage fetch error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a speaker-model inference error.
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model(message.into())
    }

    /// Creates a generic internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequest(_)
            | Self::BadMultipart(_)
            | Self::UnsupportedMedia(_)
            | Self::NotRegistered
            | Self::Storage(_)
            | Self::Model(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let payload = ErrorPayload {
            error: self.to_string(),
        };
        (status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn validation_and_processing_failures_are_bad_request() {
        for err in [
            AppError::invalid_request("missing field"),
            AppError::bad_multipart("truncated body"),
            AppError::unsupported_media("bad extension"),
            AppError::NotRegistered,
            AppError::storage("object not found"),
            AppError::model("inference failed"),
        ] {
            assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn auth_and_internal_failures_keep_their_status() {
        assert_eq!(
            AppError::unauthorized("missing bearer token")
                .into_response()
                .status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::internal("worker died").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
