//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::keywords::KeywordsConfig;
use crate::templates::MessageCatalog;
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation
    #[default]
    Development,
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    /// Timeouts and limits of the conversation lifecycle
    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub handoff: HandoffConfig,

    /// Menu and command synonyms
    #[serde(default)]
    pub keywords: KeywordsConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// OpenAI-compatible endpoint used by assisted extraction
    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub quote_service: QuoteServiceConfig,

    /// Outbound messaging gateway
    #[serde(default)]
    pub messaging: MessagingConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Field schema file; the embedded equine schema when unset
    #[serde(default)]
    pub schema_path: Option<String>,

    #[serde(default)]
    pub templates: MessageCatalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Upper bound for a whole HTTP request, webhook turns included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    180
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            auth: AuthConfig::default(),
        }
    }
}

/// Credentials for the operator API and the inbound webhook
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Require `Authorization: Bearer <api_key>` on operator routes
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Shared secret the gateway sends with each webhook call; the webhook
    /// is open when unset
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Idle time after which a bot-driven conversation restarts
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Idle time after which an operator-owned conversation returns to the bot
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default = "default_max_transcript_len")]
    pub max_transcript_len: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_agent_timeout_secs() -> u64 {
    86_400
}

fn default_max_transcript_len() -> usize {
    200
}

fn default_max_sessions() -> usize {
    100_000
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            agent_timeout_secs: default_agent_timeout_secs(),
            max_transcript_len: default_max_transcript_len(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl ConversationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// Case-insensitive substrings that request a human operator
    #[serde(default = "default_handoff_keywords")]
    pub keywords: Vec<String>,
}

fn default_handoff_keywords() -> Vec<String> {
    [
        "atendente",
        "humano",
        "pessoa",
        "agente",
        "operador",
        "falar com alguem",
        "falar com alguém",
        "falar com uma pessoa",
        "suporte",
        "ajuda humana",
        "transferir",
        "quero falar",
        "preciso falar",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            keywords: default_handoff_keywords(),
        }
    }
}

/// Which extractor implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStrategy {
    /// Schema patterns only
    #[default]
    Deterministic,
    /// External extraction service, falling back to patterns
    Assisted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub strategy: ExtractionStrategy,
    /// Budget for one assisted extraction call
    #[serde(default = "default_extraction_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_extraction_timeout_ms() -> u64 {
    8_000
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            strategy: ExtractionStrategy::default(),
            timeout_ms: default_extraction_timeout_ms(),
        }
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_llm_temperature() -> f32 {
    0.1
}

fn default_llm_max_tokens() -> usize {
    500
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteServiceConfig {
    /// Portal-filing service; quotes fail softly when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_quote_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_quote_timeout_secs() -> u64 {
    120
}

impl Default for QuoteServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_quote_timeout_secs(),
        }
    }
}

impl QuoteServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagingConfig {
    /// Gateway instance URL; texts go to `{endpoint}/messages/chat` and
    /// proposal documents to `{endpoint}/messages/document`. Replies are
    /// only returned in the webhook response when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_conversation()?;
        self.validate_extraction()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_conversation(&self) -> Result<(), ConfigError> {
        let conv = &self.conversation;

        if conv.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.timeout_secs".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }

        if conv.agent_timeout_secs <= conv.timeout_secs {
            return Err(ConfigError::InvalidValue {
                field: "conversation.agent_timeout_secs".to_string(),
                message: format!(
                    "Must be greater than conversation.timeout_secs ({})",
                    conv.timeout_secs
                ),
            });
        }

        if conv.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.max_sessions".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }

        if self.handoff.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "handoff.keywords".to_string(),
                message: "At least one handoff keyword is required".to_string(),
            });
        }

        if self.quote_service.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "quote_service.timeout_secs".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    fn validate_extraction(&self) -> Result<(), ConfigError> {
        if self.extraction.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "extraction.timeout_ms".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }

        if self.extraction.strategy == ExtractionStrategy::Assisted {
            if self.llm.endpoint.trim().is_empty() {
                return Err(ConfigError::MissingField("llm.endpoint".to_string()));
            }
            if !(0.0..=2.0).contains(&self.llm.temperature) {
                return Err(ConfigError::InvalidValue {
                    field: "llm.temperature".to_string(),
                    message: format!("Must be between 0.0 and 2.0, got {}", self.llm.temperature),
                });
            }
        }

        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        let auth = &self.server.auth;
        let key_missing = auth.api_key.as_deref().map_or(true, |k| k.is_empty());
        if auth.enabled && key_missing {
            return Err(ConfigError::MissingField("server.auth.api_key".to_string()));
        }

        if self.environment.is_production() && !auth.enabled {
            tracing::warn!("Operator API authentication is disabled in production");
        }
        if self.environment.is_production() && auth.webhook_secret.is_none() {
            tracing::warn!("Webhook accepts unauthenticated calls in production");
        }

        Ok(())
    }
}

/// Load settings from files and environment
///
/// Priority: env vars > config/{env}.* > config/default.* > defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("QUOTE_INTAKE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.conversation.timeout(), Duration::from_secs(600));
        assert_eq!(settings.conversation.agent_timeout(), Duration::from_secs(86_400));
        assert_eq!(settings.extraction.strategy, ExtractionStrategy::Deterministic);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_agent_timeout_must_exceed_conversation_timeout() {
        let mut settings = Settings::default();
        settings.conversation.agent_timeout_secs = 300;
        assert!(settings.validate().is_err());

        settings.conversation.agent_timeout_secs = 3_600;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_handoff_keywords_rejected() {
        let mut settings = Settings::default();
        settings.handoff.keywords = vec!["  ".to_string()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_auth_requires_key() {
        let mut settings = Settings::default();
        settings.server.auth.enabled = true;
        assert!(settings.validate().is_err());

        settings.server.auth.api_key = Some("secret".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_assisted_strategy_checks_llm() {
        let mut settings = Settings::default();
        settings.extraction.strategy = ExtractionStrategy::Assisted;
        settings.llm.endpoint = String::new();
        assert!(settings.validate().is_err());

        settings.llm.endpoint = "http://localhost:11434/v1".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
environment: production
conversation:
  timeout_secs: 900
extraction:
  strategy: assisted
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert!(settings.environment.is_production());
        assert_eq!(settings.conversation.timeout_secs, 900);
        assert_eq!(settings.conversation.agent_timeout_secs, 86_400);
        assert_eq!(settings.extraction.strategy, ExtractionStrategy::Assisted);
        assert!(!settings.handoff.keywords.is_empty());
    }
}
