//! HTTP Endpoints
//!
//! `POST /webhook` feeds inbound contact messages to the engine and answers
//! with the replies once the turn is committed. `/api/sessions/*` is the
//! operator API. Each route group carries its own guard from `auth`.

use axum::{
    extract::{Json, Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    middleware,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use quote_intake_agent::TurnOutcome;
use quote_intake_core::{ConversationState, Session};

use crate::auth::{require_operator, require_webhook_secret};
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::ServerError;

pub fn create_router(state: AppState) -> Router {
    let config = state.config.read();
    let cors_layer = build_cors_layer(&config.server.cors_origins, config.server.cors_enabled);
    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);
    drop(config);

    let operator = Router::new()
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/assign", post(assign_agent))
        .route("/api/sessions/:id/release", post(release_to_bot))
        .route("/api/sessions/:id/close", post(close_session))
        .route("/api/sessions/:id/messages", post(agent_message))
        .route("/admin/reload-config", post(reload_config))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_operator));

    let inbound = Router::new()
        .route("/webhook", post(webhook))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_webhook_secret));

    Router::new()
        .merge(operator)
        .merge(inbound)
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Permissive when disabled, localhost when nothing valid is configured
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    if parsed_origins.is_empty() {
        tracing::info!("No valid CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static("http://localhost:3000"))
            .allow_methods(methods)
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods(methods)
        .allow_headers(Any)
}

/// Inbound message, either flat or as delivered by the UltraMsg gateway
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundMessage {
    Direct { contact_id: String, text: String },
    Gateway { data: GatewayMessage },
}

#[derive(Debug, Deserialize)]
struct GatewayMessage {
    from: String,
    #[serde(default)]
    body: String,
    /// Echo of a message this number sent
    #[serde(default, rename = "fromMe")]
    from_me: bool,
}

impl InboundMessage {
    /// `None` for gateway echoes of our own replies
    fn into_parts(self) -> Option<(String, String)> {
        match self {
            InboundMessage::Direct { contact_id, text } => Some((contact_id, text)),
            InboundMessage::Gateway { data } if data.from_me => None,
            InboundMessage::Gateway { data } => Some((data.from, data.body)),
        }
    }
}

#[derive(Debug, Serialize)]
struct TurnResponse {
    contact_id: String,
    state: ConversationState,
    outbound: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<String>,
    /// Proposal document URL sent to the contact after `outbound`
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<String>,
}

impl From<TurnOutcome> for TurnResponse {
    fn from(outcome: TurnOutcome) -> Self {
        Self {
            contact_id: outcome.contact_id,
            state: outcome.state,
            outbound: outcome.outbound,
            reference: outcome.completion.map(|c| c.reference),
            document: outcome.document.map(|d| d.url),
        }
    }
}

async fn webhook(
    State(state): State<AppState>,
    Json(message): Json<InboundMessage>,
) -> Result<impl IntoResponse, ServerError> {
    let Some((contact_id, text)) = message.into_parts() else {
        return Ok((StatusCode::OK, Json(serde_json::json!({ "status": "ignored" }))).into_response());
    };
    if contact_id.trim().is_empty() {
        return Err(ServerError::InvalidRequest("contact id is required".to_string()));
    }

    let outcome = state.engine.handle_message(&contact_id, &text).await?;
    Ok(Json(TurnResponse::from(outcome)).into_response())
}

#[derive(Debug, Serialize)]
struct SessionSummary {
    contact_id: String,
    state: ConversationState,
    assigned_agent_id: Option<String>,
    message_count: u64,
    last_interaction_at: chrono::DateTime<chrono::Utc>,
    quotes: usize,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            contact_id: session.contact_id.clone(),
            state: session.state,
            assigned_agent_id: session.assigned_agent_id.clone(),
            message_count: session.message_count,
            last_interaction_at: session.last_interaction_at(),
            quotes: session.history().len(),
        }
    }
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ServerError> {
    let sessions = state.engine.list_sessions().await?;
    let summaries: Vec<SessionSummary> = sessions.iter().map(SessionSummary::from).collect();
    Ok(Json(serde_json::json!({
        "sessions": summaries,
        "count": summaries.len(),
    })))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ServerError> {
    state
        .engine
        .session(&id)
        .await?
        .map(Json)
        .ok_or(ServerError::SessionNotFound(id))
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    agent_id: String,
}

async fn assign_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<TurnResponse>, ServerError> {
    let outcome = state.engine.assign_agent(&id, &request.agent_id).await?;
    Ok(Json(outcome.into()))
}

async fn release_to_bot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TurnResponse>, ServerError> {
    let outcome = state.engine.release_to_bot(&id).await?;
    Ok(Json(outcome.into()))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TurnResponse>, ServerError> {
    let outcome = state.engine.close(&id).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
struct AgentMessageRequest {
    agent_id: String,
    text: String,
}

async fn agent_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AgentMessageRequest>,
) -> Result<Json<TurnResponse>, ServerError> {
    if request.text.trim().is_empty() {
        return Err(ServerError::InvalidRequest("text is required".to_string()));
    }
    let outcome = state
        .engine
        .record_agent_message(&id, &request.agent_id, &request.text)
        .await?;
    Ok(Json(outcome.into()))
}

async fn reload_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload_config() {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "message": "Configuration reloaded successfully"
            })),
        ),
        Err(e) => {
            tracing::error!("Config reload failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "error",
                    "message": e
                })),
            )
        }
    }
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let environment = state.get_config().environment;
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": environment,
        "sessions": state.engine.store().len(),
        "extractor": state.engine.extractor_name(),
    }))
}
