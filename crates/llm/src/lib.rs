//! LLM-backed field extraction
//!
//! Features:
//! - OpenAI-compatible chat completion backend (OpenAI, vLLM, Ollama)
//! - Strict extraction prompt built from the field schema
//! - `LlmExtractionService`, the assisted strategy's `ExtractionService`

pub mod backend;
pub mod extraction;
pub mod prompt;

pub use backend::{GenerationResult, LlmBackend, OpenAIBackend, OpenAIConfig};
pub use extraction::{parse_extraction_response, LlmExtractionService};
pub use prompt::{ExtractionPrompt, Message, Role};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for quote_intake_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Configuration(msg) => quote_intake_core::Error::Configuration(msg),
            other => quote_intake_core::Error::Extraction(other.to_string()),
        }
    }
}
