//! Error types shared across the intake crates

use thiserror::Error;

/// Errors raised by the intake engine and its collaborators
///
/// Only `SessionStoreUnavailable`, `SessionNotFound` and `InvalidOperation`
/// escape the conversation engine. The rest are recovered inside a turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Invalid value for {field}: {reason}")]
    FieldValidation { field: String, reason: String },

    #[error("Quote generation failed: {0}")]
    QuoteGeneration(String),

    #[error("Session store unavailable: {0}")]
    SessionStoreUnavailable(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether the caller (transport) should retry delivery of the message
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::SessionStoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
