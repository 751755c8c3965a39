//! Quote Intake Server Entry Point

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use quote_intake_agent::{build_extractor, ConversationEngine, InMemorySessionStore, StateMachine};
use quote_intake_config::{load_settings, ExtractionStrategy, FieldSchema, Settings};
use quote_intake_core::{ExtractionService, QuoteGenerator};
use quote_intake_llm::{LlmExtractionService, OpenAIBackend, OpenAIConfig};
use quote_intake_server::{
    create_router, init_metrics, AppState, HttpMessageSender, HttpQuoteGenerator,
    UnconfiguredQuoteGenerator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("QUOTE_INTAKE_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // tracing is not up yet
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&config);

    tracing::info!("Starting Quote Intake Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        config_path = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    let metrics_handle = if config.observability.metrics_enabled {
        init_metrics()
    } else {
        None
    };

    let schema = FieldSchema::load(config.schema_path.as_deref()).context("loading field schema")?;
    tracing::info!(
        schema = %schema.name(),
        fields = schema.fields().len(),
        "Field schema loaded"
    );

    let engine = build_engine(&config, schema)?;
    tracing::info!(extractor = engine.extractor_name(), "Conversation engine ready");

    let mut state = AppState::new(config.clone(), engine).with_env(env);
    if let Some(handle) = metrics_handle {
        state = state.with_metrics(handle);
    }

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn build_engine(config: &Settings, schema: Arc<FieldSchema>) -> anyhow::Result<ConversationEngine> {
    let service: Option<Arc<dyn ExtractionService>> = match config.extraction.strategy {
        ExtractionStrategy::Assisted => {
            let llm_config = OpenAIConfig::from_settings(&config.llm, config.extraction.timeout());
            match OpenAIBackend::new(llm_config) {
                Ok(backend) => {
                    let service: Arc<dyn ExtractionService> =
                        Arc::new(LlmExtractionService::new(Arc::new(backend), schema.clone()));
                    Some(service)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "LLM backend unavailable");
                    None
                }
            }
        }
        ExtractionStrategy::Deterministic => None,
    };
    let extractor = build_extractor(&config.extraction, schema.clone(), service);

    let quotes: Arc<dyn QuoteGenerator> = match &config.quote_service.endpoint {
        Some(endpoint) => Arc::new(HttpQuoteGenerator::new(
            endpoint.clone(),
            config.quote_service.timeout(),
        )?),
        None => {
            tracing::warn!("No quote service endpoint configured; quotes will fail");
            Arc::new(UnconfiguredQuoteGenerator)
        }
    };

    let machine = StateMachine::from_settings(schema, config);
    let store = Arc::new(InMemorySessionStore::new(config.conversation.max_sessions));

    let mut engine = ConversationEngine::new(machine, store, extractor, quotes)
        .with_quote_timeout(config.quote_service.timeout());

    match (&config.messaging.endpoint, &config.messaging.token) {
        (Some(endpoint), token) => {
            let sender = HttpMessageSender::new(endpoint.clone(), token.clone().unwrap_or_default())?;
            engine = engine.with_sender(Arc::new(sender));
        }
        (None, _) => {
            tracing::info!("No messaging gateway configured; replies are returned in webhook responses only");
        }
    }

    Ok(engine)
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("quote_intake={},tower_http=info", level).into()
    });

    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}
