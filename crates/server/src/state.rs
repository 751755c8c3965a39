//! Application State
//!
//! Shared state across all handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use std::sync::Arc;

use quote_intake_agent::ConversationEngine;
use quote_intake_config::{load_settings, Settings};

#[derive(Clone)]
pub struct AppState {
    /// Wrapped in a lock so auth settings can be reloaded at runtime
    pub config: Arc<RwLock<Settings>>,
    pub engine: Arc<ConversationEngine>,
    /// Absent when metrics are disabled or the recorder was already taken
    pub metrics: Option<PrometheusHandle>,
    /// Environment name for config reload
    env: Option<String>,
}

impl AppState {
    pub fn new(config: Settings, engine: ConversationEngine) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            engine: Arc::new(engine),
            metrics: None,
            env: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.env = env;
        self
    }

    /// Reload configuration from disk
    ///
    /// Only request-time settings (auth) take effect; the engine keeps the
    /// timeouts and keywords it was built with.
    pub fn reload_config(&self) -> Result<(), String> {
        let new_config = load_settings(self.env.as_deref())
            .map_err(|e| format!("Failed to reload config: {}", e))?;

        *self.config.write() = new_config;

        tracing::info!("Configuration reloaded successfully");
        Ok(())
    }

    pub fn get_config(&self) -> parking_lot::RwLockReadGuard<'_, Settings> {
        self.config.read()
    }
}
