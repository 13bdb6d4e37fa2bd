//! Error taxonomy shared by the registry, telemetry pipeline, and HTTP layer.
//!
//! Every failure carries a stable machine-readable kind plus a human-readable
//! message; the axum layer maps kinds onto status codes and a uniform JSON
//! body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Unauthorized(String),

    /// A concurrent writer got to the zone first and the optimistic write
    /// lost. Rare under per-zone locking, but reportable rather than fatal.
    #[error("{0}")]
    Conflict(String),

    /// Persistence timed out or failed transiently. Mutating paths retry a
    /// bounded number of times before surfacing this.
    #[error("{0}")]
    Unavailable(String),

    /// Server-side configuration problem (e.g. no sensor token configured).
    /// Distinct from `Unauthorized`: the caller cannot fix it.
    #[error("server configuration error: {0}")]
    Misconfigured(String),
}

impl AppError {
    /// Stable kind string, part of the API contract.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::Unavailable(_) => "unavailable",
            Self::Misconfigured(_) => "misconfigured",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "{self}");
        }
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(AppError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(AppError::InvalidArgument("x".into()).kind(), "invalid_argument");
        assert_eq!(AppError::Unauthorized("x".into()).kind(), "unauthorized");
        assert_eq!(AppError::Conflict("x".into()).kind(), "conflict");
        assert_eq!(AppError::Unavailable("x".into()).kind(), "unavailable");
        assert_eq!(AppError::Misconfigured("x".into()).kind(), "misconfigured");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::InvalidArgument("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Unavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Misconfigured("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn misconfigured_message_prefix() {
        let e = AppError::Misconfigured("sensor token not set".into());
        assert_eq!(
            e.to_string(),
            "server configuration error: sensor token not set"
        );
    }
}
