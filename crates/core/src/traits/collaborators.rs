use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::FieldValues;

/// A file sent to the contact, e.g. the generated proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundDocument {
    /// Location the gateway fetches the file from
    pub url: String,
    pub filename: String,
    pub caption: String,
}

/// Outbound message delivery. Best effort, no retries owed.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Returns `false` when the message could not be delivered
    async fn send(&self, contact_id: &str, text: &str) -> bool;

    /// Returns `false` when the document could not be delivered
    async fn send_document(&self, contact_id: &str, document: &OutboundDocument) -> bool;
}

/// Result of a quote generation attempt
///
/// `reference` identifies the quote towards the contact; `artifact_ref`
/// points at the generated document and is never shown as an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuoteOutcome {
    pub success: bool,
    #[serde(default, alias = "cotacao_id")]
    pub reference: Option<String>,
    #[serde(default, alias = "document_url", alias = "pdf_path")]
    pub artifact_ref: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl QuoteOutcome {
    pub fn succeeded(reference: impl Into<String>) -> Self {
        Self {
            success: true,
            reference: Some(reference.into()),
            artifact_ref: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            reference: None,
            artifact_ref: None,
            error: Some(error.into()),
        }
    }

    pub fn with_artifact(mut self, artifact_ref: impl Into<String>) -> Self {
        self.artifact_ref = Some(artifact_ref.into());
        self
    }
}

/// Files a completed intake form with the downstream quoting system
#[async_trait]
pub trait QuoteGenerator: Send + Sync {
    async fn generate(&self, fields: &FieldValues) -> QuoteOutcome;
}

/// Backing call of the assisted extraction strategy
///
/// Any transport or shape problem must come back as `Error::Extraction`.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, text: &str, existing: &FieldValues) -> Result<FieldValues>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_keeps_reference_and_document_apart() {
        let outcome: QuoteOutcome = serde_json::from_str(
            r#"{"success": true, "cotacao_id": "A1B2", "pdf_path": "https://files.example/a1b2.pdf"}"#,
        )
        .unwrap();
        assert_eq!(outcome.reference.as_deref(), Some("A1B2"));
        assert_eq!(outcome.artifact_ref.as_deref(), Some("https://files.example/a1b2.pdf"));

        let bare: QuoteOutcome = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(bare.reference.is_none());
        assert!(bare.artifact_ref.is_none());
    }
}
