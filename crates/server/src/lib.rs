//! Quote Intake Server
//!
//! Webhook adapter for inbound contact messages, the operator JSON API,
//! HTTP implementations of the outbound collaborators and Prometheus metrics.

pub mod auth;
pub mod http;
pub mod integrations;
pub mod metrics;
pub mod state;

pub use auth::{require_operator, require_webhook_secret};
pub use http::create_router;
pub use integrations::{HttpMessageSender, HttpQuoteGenerator, UnconfiguredQuoteGenerator};
pub use metrics::{init_metrics, metrics_handler};
pub use state::AppState;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<quote_intake_core::Error> for ServerError {
    fn from(err: quote_intake_core::Error) -> Self {
        use quote_intake_core::Error;
        match err {
            Error::SessionNotFound(id) => ServerError::SessionNotFound(id),
            Error::InvalidOperation(msg) => ServerError::Conflict(msg),
            Error::SessionStoreUnavailable(msg) => ServerError::Unavailable(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<&ServerError> for StatusCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = StatusCode::from(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "retryable": status == StatusCode::SERVICE_UNAVAILABLE,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote_intake_core::Error;

    #[test]
    fn test_core_errors_map_to_status() {
        let cases = [
            (Error::SessionNotFound("c".into()), StatusCode::NOT_FOUND),
            (Error::InvalidOperation("x".into()), StatusCode::CONFLICT),
            (Error::SessionStoreUnavailable("full".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::Timeout("t".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let server_err = ServerError::from(err);
            assert_eq!(StatusCode::from(&server_err), expected);
        }
    }
}
