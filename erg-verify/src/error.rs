//! Error types for erg-verify
//!
//! Store failures surface as `Unavailable`; they are never converted into a
//! permissive result. Oracle failures never reach this type: the oracle
//! client degrades them into a negative `VisionResult`.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// No identity on the request (401)
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Caller lacks administrator capability (403)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Missing or malformed input (400)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown entry (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store or dependency unreachable (503)
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Unexpected failure (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable code for the response body
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "UNAUTHENTICATED",
            ApiError::PermissionDenied(_) => "PERMISSION_DENIED",
            ApiError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unavailable(_) => "UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<erg_common::Error> for ApiError {
    fn from(err: erg_common::Error) -> Self {
        use erg_common::Error;

        match err {
            Error::Database(e) => ApiError::Unavailable(format!("Store unavailable: {}", e)),
            Error::Unavailable(msg) => ApiError::Unavailable(msg),
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::InvalidArgument(msg),
            Error::Io(e) => ApiError::Internal(e.to_string()),
            Error::Config(msg) => ApiError::Internal(msg),
            Error::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

/// Malformed or mistyped request bodies are the caller's fault
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidArgument(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Unauthenticated(msg)
            | ApiError::PermissionDenied(msg)
            | ApiError::InvalidArgument(msg)
            | ApiError::NotFound(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Internal(msg) => msg.clone(),
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
