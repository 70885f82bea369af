//! Boundary error types. Core computations never throw on bad data — only
//! request validation and mode transitions produce an `Err`, matching the
//! policy in the teacher's `error/` module (one enum per concern, surfaced
//! at the HTTP boundary via `IntoResponse`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

/// Malformed `POST /packet` bodies. Always HTTP 400.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("request body must be a nonempty array of samples")]
    EmptyBatch,
    #[error("sample has a missing or non-numeric/non-string deviceId, timestamp, or loudnessDb field")]
    NonNumericField,
    #[error("unknown deviceId {0:?}")]
    UnknownDevice(String),
    #[error("a batch must contain samples from exactly one deviceId, found {0:?} and {1:?}")]
    MixedDevices(String, String),
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Unknown mode string passed to `POST /mode`. Always HTTP 400.
#[derive(Debug, Error)]
pub enum ModeError {
    #[error("unknown mode {0:?}, expected \"sync\" or \"localize\"")]
    Unknown(String),
}

impl IntoResponse for ModeError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Any unexpected internal failure — currently only a poisoned store mutex.
/// Mapped to HTTP 500 rather than panicking, since a single stuck request
/// must not take down the whole server.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("internal state store lock was poisoned")]
    PoisonedStore,
}

impl IntoResponse for InternalError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal error", "details": self.to_string() })),
        )
            .into_response()
    }
}

/// Unifies the boundary error enums so a single handler can return any of
/// them via `?`, in the style of the teacher's single `HttpServerError` enum.
#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Mode(ModeError),
    Internal(InternalError),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl From<ModeError> for ApiError {
    fn from(err: ModeError) -> Self {
        ApiError::Mode(err)
    }
}

impl From<InternalError> for ApiError {
    fn from(err: InternalError) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(err) => err.into_response(),
            ApiError::Mode(err) => err.into_response(),
            ApiError::Internal(err) => err.into_response(),
        }
    }
}
