//! Handshake error responses.
//!
//! Almost all protocol failures travel inside ack envelopes (see
//! `protocol`); the HTTP surface only ever refuses an upgrade.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error body returned when an upgrade is refused.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Errors that refuse a connection before it exists.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Access denied")]
    AccessDenied,

    #[error("server is shutting down")]
    ShuttingDown,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AccessDenied => StatusCode::UNAUTHORIZED,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
