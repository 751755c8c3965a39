//! Prometheus metrics
//!
//! The engine records through the `metrics` facade; this module installs the
//! Prometheus recorder and renders it at `/metrics`.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

const TURN_DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 120.0];

/// Install the global recorder
///
/// Returns `None` if a recorder is already installed (tests, embedding).
pub fn init_metrics() -> Option<PrometheusHandle> {
    let builder = match PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("intake_turn_duration_seconds".to_string()),
        TURN_DURATION_BUCKETS,
    ) {
        Ok(builder) => builder,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid histogram buckets, using defaults");
            PrometheusBuilder::new()
        }
    };

    match builder.install_recorder() {
        Ok(handle) => {
            describe_metrics();
            Some(handle)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!("intake_messages_total", "Inbound messages by state at receipt");
    metrics::describe_counter!("intake_transitions_total", "State transitions");
    metrics::describe_counter!(
        "intake_extraction_fallbacks_total",
        "Assisted extractions answered by the pattern strategy"
    );
    metrics::describe_counter!("intake_quotes_total", "Quote generation attempts by outcome");
    metrics::describe_counter!("intake_handoffs_total", "Conversations handed to an operator");
    metrics::describe_counter!("intake_send_failures_total", "Outbound messages not delivered");
    metrics::describe_counter!("intake_webhook_rejected_total", "Webhook calls without a valid secret");
    metrics::describe_histogram!(
        "intake_turn_duration_seconds",
        metrics::Unit::Seconds,
        "Time to apply one inbound message"
    );
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}
