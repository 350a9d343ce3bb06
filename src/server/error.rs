//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; any
//! [`mediabatch_common::Error`] converts with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mediabatch_common::Error;
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: Error,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self { inner }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(Error::Unauthorized(message.into()))
    }

    pub fn inner(&self) -> &Error {
        &self.inner
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        } else {
            tracing::debug!(status = %status, error = %self.inner, "Request rejected");
        }

        let code = match &self.inner {
            Error::Validation(_) => "validation_error",
            Error::NotFound { .. } => "not_found",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::Decode { .. } => "decode_error",
            Error::Archive(_) => "archive_error",
            Error::Tool { .. } => "tool_error",
            Error::Io { .. } => "io_error",
            Error::Job(_) => "job_error",
            Error::Internal(_) => "internal_error",
        };

        let body = json!({
            "error": self.inner.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
