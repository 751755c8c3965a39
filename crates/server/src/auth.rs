//! Request Authentication
//!
//! Routes fall into three classes:
//!
//! - operator routes (`/api/*`, `/admin/*`) need `Authorization: Bearer <api_key>`
//!   while `server.auth.enabled` is set
//! - the webhook needs the gateway's shared secret once
//!   `server.auth.webhook_secret` is configured, sent either as the
//!   `X-Webhook-Secret` header or as a `secret` query parameter (gateways
//!   that cannot add headers put it in the callback URL)
//! - `/health` and `/metrics` are always open
//!
//! The guards are attached per route group with `route_layer`, so an
//! unknown path is still a plain 404.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};

use crate::state::AppState;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";
const WEBHOOK_SECRET_PARAM: &str = "secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Credential<'a> {
    Absent,
    Malformed,
    Presented(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Missing,
    Malformed,
    Mismatch,
    Unconfigured,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Rejection::Missing => (StatusCode::UNAUTHORIZED, "credentials required"),
            Rejection::Mismatch => (StatusCode::UNAUTHORIZED, "invalid credentials"),
            Rejection::Malformed => (
                StatusCode::BAD_REQUEST,
                "expected Authorization: Bearer <token>",
            ),
            Rejection::Unconfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "authentication is enabled without a key",
            ),
        };
        (status, Json(serde_json::json!({ "error": message, "retryable": false }))).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Credential<'_> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Credential::Absent;
    };
    match value.to_str().ok().and_then(|v| v.strip_prefix("Bearer ")) {
        Some(token) if !token.is_empty() => Credential::Presented(token),
        _ => Credential::Malformed,
    }
}

/// Header wins over the query parameter
fn webhook_secret<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Credential<'a> {
    if let Some(value) = headers.get(WEBHOOK_SECRET_HEADER) {
        return match value.to_str() {
            Ok(secret) => Credential::Presented(secret),
            Err(_) => Credential::Malformed,
        };
    }

    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == WEBHOOK_SECRET_PARAM)
        .map_or(Credential::Absent, |(_, secret)| Credential::Presented(secret))
}

/// Length leaks; content does not
fn secrets_match(expected: &str, presented: &str) -> bool {
    expected.len() == presented.len()
        && expected
            .bytes()
            .zip(presented.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn verify(expected: &str, credential: Credential<'_>) -> Result<(), Rejection> {
    if expected.is_empty() {
        return Err(Rejection::Unconfigured);
    }
    match credential {
        Credential::Absent => Err(Rejection::Missing),
        Credential::Malformed => Err(Rejection::Malformed),
        Credential::Presented(secret) if secrets_match(expected, secret) => Ok(()),
        Credential::Presented(_) => Err(Rejection::Mismatch),
    }
}

/// Guards the operator API and admin routes
pub async fn require_operator(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let expected = {
        let config = state.config.read();
        let auth = &config.server.auth;
        auth.enabled.then(|| auth.api_key.clone().unwrap_or_default())
    };
    let Some(expected) = expected else {
        return next.run(request).await;
    };

    match verify(&expected, bearer_token(request.headers())) {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            tracing::warn!(path = %request.uri().path(), ?rejection, "Operator request rejected");
            rejection.into_response()
        }
    }
}

/// Guards the inbound webhook
pub async fn require_webhook_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state
        .config
        .read()
        .server
        .auth
        .webhook_secret
        .clone()
        .filter(|secret| !secret.is_empty());
    let Some(expected) = expected else {
        return next.run(request).await;
    };

    match verify(&expected, webhook_secret(request.headers(), request.uri().query())) {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            metrics::counter!("intake_webhook_rejected_total").increment(1);
            tracing::warn!(?rejection, "Webhook call rejected");
            rejection.into_response()
        }
    }
}
