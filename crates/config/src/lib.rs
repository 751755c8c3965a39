//! Configuration management for the quote intake assistant
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default.*`, `config/{env}.*`)
//! - Environment variables (`QUOTE_INTAKE__` prefix, `__` separator)
//!
//! The field schema describing the intake form ships as an embedded YAML
//! document and can be replaced through `schema_path`.

pub mod keywords;
pub mod schema;
pub mod settings;
pub mod templates;

pub use keywords::{normalize_input, KeywordSet, KeywordsConfig};
pub use schema::{FieldKind, FieldSchema, FieldSpec, FieldValidationError, Section};
pub use settings::{
    load_settings, AuthConfig, ConversationConfig, ExtractionConfig, ExtractionStrategy,
    HandoffConfig, LlmSettings, MessagingConfig, ObservabilityConfig, QuoteServiceConfig,
    RuntimeEnvironment, ServerConfig, Settings,
};
pub use templates::{render, MessageCatalog};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for quote_intake_core::Error {
    fn from(err: ConfigError) -> Self {
        quote_intake_core::Error::Configuration(err.to_string())
    }
}
