//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`shiftcast_core::Error`] so that route
//! handlers can return `Result<T, shiftcast_core::Error>` directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
pub struct AppError {
    inner: shiftcast_core::Error,
}

impl AppError {
    pub fn new(inner: shiftcast_core::Error) -> Self {
        Self { inner }
    }
}

impl From<shiftcast_core::Error> for AppError {
    fn from(e: shiftcast_core::Error) -> Self {
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
                "Server error in request handler"
            );
        }

        let code = match &self.inner {
            shiftcast_core::Error::NotFound { .. } => "not_found",
            shiftcast_core::Error::Validation(_) => "validation_error",
            shiftcast_core::Error::Database { .. } => "database_error",
            shiftcast_core::Error::Io { .. } => "io_error",
            shiftcast_core::Error::Upstream { .. } => "upstream_error",
            shiftcast_core::Error::Geometry(_) => "geometry_error",
            shiftcast_core::Error::Internal(_) => "internal_error",
        };

        let body = json!({
            "error": self.inner.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
