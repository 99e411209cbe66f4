//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code and taxonomy code.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after_seconds: Option<u64>,
    pub violation_count: Option<u32>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after_seconds: None,
            violation_count: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_argument", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "auth_required", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "retryAfterSeconds")]
    retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "violationCount")]
    violation_count: Option<u32>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            success: false,
            error: self.message,
            code: self.code,
            retry_after_seconds: self.retry_after_seconds,
            violation_count: self.violation_count,
        });
        (self.status, body).into_response()
    }
}

/// Map core errors onto HTTP statuses. Storage and internal failures are
/// logged in full and surfaced as a generic 500.
impl From<studiocast_core::Error> for AppError {
    fn from(err: studiocast_core::Error) -> Self {
        use studiocast_core::Error;

        let code = err.code();
        match err {
            Error::AuthRequired => Self::unauthorized("Authentication required"),
            Error::Forbidden(msg) => Self::forbidden(msg),
            Error::NotFound(what) => Self::not_found(format!("{what} not found")),
            Error::Conflict(msg) => Self::new(StatusCode::CONFLICT, code, msg),
            Error::InvalidArgument(msg) => Self::bad_request(msg),
            Error::RateLimited {
                retry_after_seconds,
                violation_count,
                message,
            } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                code: "rate_limited",
                message,
                retry_after_seconds: Some(retry_after_seconds),
                violation_count: Some(violation_count),
            },
            Error::Capacity(msg) => Self::new(StatusCode::SERVICE_UNAVAILABLE, code, msg),
            Error::SpawnFailed(msg) => {
                tracing::error!("spawn failed: {msg}");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, code, "Stream processing unavailable")
            }
            Error::Expired => Self::new(StatusCode::GONE, code, "Access code has expired"),
            Error::Revoked => Self::new(StatusCode::FORBIDDEN, code, "Access code was revoked"),
            Error::Storage(msg) => {
                tracing::error!("storage error: {msg}");
                Self::internal("Storage error")
            }
            Error::Serialization(e) => {
                tracing::error!("serialization error: {e}");
                Self::internal("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                Self::internal("Internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_carries_retry_metadata() {
        let err: AppError = studiocast_core::Error::RateLimited {
            retry_after_seconds: 300,
            violation_count: 2,
            message: "slow down".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after_seconds, Some(300));
        assert_eq!(err.violation_count, Some(2));
    }

    #[test]
    fn test_taxonomy_statuses() {
        let cases = [
            (studiocast_core::Error::AuthRequired, StatusCode::UNAUTHORIZED),
            (studiocast_core::Error::Expired, StatusCode::GONE),
            (studiocast_core::Error::Revoked, StatusCode::FORBIDDEN),
            (
                studiocast_core::Error::Capacity("full".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                studiocast_core::Error::Conflict("dup".to_string()),
                StatusCode::CONFLICT,
            ),
        ];
        for (core_err, status) in cases {
            let err: AppError = core_err.into();
            assert_eq!(err.status, status);
        }
    }
}
