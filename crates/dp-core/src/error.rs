//! Server-wide error taxonomy.
//!
//! Mirrors the taxonomy in spec.md §7 and implements Axum's `IntoResponse`
//! so handlers across the API surface can simply return
//! `Result<T, DevPulseError>`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DevPulseError {
    /// Input fails schema or tag-set validation.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Persistence failure during a write.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Persistence failure during a read, or any other store I/O error.
    #[error("store io error: {0}")]
    StoreIOError(String),

    /// Referenced id/session/webhook absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent update precondition failure on settings/webhooks.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Ingest deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Config load/parse failure.
    #[error("config error: {0}")]
    Config(String),

    /// Anything else, sanitized before reaching the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for DevPulseError {
    fn from(e: rusqlite::Error) -> Self {
        DevPulseError::StoreIOError(e.to_string())
    }
}

impl From<tokio_rusqlite::Error> for DevPulseError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        DevPulseError::StoreIOError(e.to_string())
    }
}

impl IntoResponse for DevPulseError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DevPulseError::Malformed(m) => (StatusCode::BAD_REQUEST, m.clone()),
            DevPulseError::StoreUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            DevPulseError::StoreIOError(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            DevPulseError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            DevPulseError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            DevPulseError::Timeout(m) => (StatusCode::GATEWAY_TIMEOUT, m.clone()),
            DevPulseError::Config(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            DevPulseError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };

        tracing::warn!(error = %self, status = %status, "request failed");

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DevPulseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let resp = DevPulseError::NotFound("webhook 1".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_maps_to_400() {
        let resp = DevPulseError::Malformed("missing source_app".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn conflict_maps_to_409() {
        let resp = DevPulseError::Conflict("stale settings version".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn timeout_maps_to_504() {
        let resp = DevPulseError::Timeout("ingest deadline exceeded".into()).into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
