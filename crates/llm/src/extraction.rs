//! Assisted extraction service backed by an LLM

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use quote_intake_config::FieldSchema;
use quote_intake_core::{Error, ExtractionService, FieldValues, Result};

use crate::backend::LlmBackend;
use crate::prompt::ExtractionPrompt;
use crate::LlmError;

/// `ExtractionService` that asks an LLM for a flat JSON object of fields
pub struct LlmExtractionService {
    backend: Arc<dyn LlmBackend>,
    schema: Arc<FieldSchema>,
}

impl LlmExtractionService {
    pub fn new(backend: Arc<dyn LlmBackend>, schema: Arc<FieldSchema>) -> Self {
        Self { backend, schema }
    }
}

#[async_trait]
impl ExtractionService for LlmExtractionService {
    async fn extract(&self, text: &str, existing: &FieldValues) -> Result<FieldValues> {
        let messages = ExtractionPrompt::new(&self.schema).build(text, existing);
        let result = self.backend.generate(&messages).await.map_err(Error::from)?;

        let fields = parse_extraction_response(&result.text, &self.schema).map_err(Error::from)?;
        tracing::debug!(
            model = %self.backend.model_name(),
            extracted = fields.len(),
            latency_ms = result.total_time_ms,
            "Assisted extraction finished"
        );
        Ok(fields)
    }
}

/// Parse the model reply into schema fields
///
/// The reply must contain one JSON object. Strings are trimmed, numbers are
/// kept in their textual form, nulls and empty strings are skipped and keys
/// outside the schema are dropped. Any other value shape fails the call.
pub fn parse_extraction_response(
    text: &str,
    schema: &FieldSchema,
) -> std::result::Result<FieldValues, LlmError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => {
            return Err(LlmError::InvalidResponse(
                "no JSON object in response".to_string(),
            ))
        }
    };

    let value: Value = serde_json::from_str(json)
        .map_err(|e| LlmError::InvalidResponse(format!("malformed JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| LlmError::InvalidResponse("expected a JSON object".to_string()))?;

    let mut fields = FieldValues::new();
    for (key, value) in object {
        if schema.field(key).is_none() {
            tracing::debug!(key = %key, "Dropping key outside the field schema");
            continue;
        }
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(LlmError::InvalidResponse(format!(
                    "unexpected value for {}: {}",
                    key, other
                )))
            }
        };
        if !text.is_empty() {
            fields.insert(key.clone(), text);
        }
    }
    Ok(fields)
}
