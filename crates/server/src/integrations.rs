//! HTTP collaborators
//!
//! `HttpMessageSender` posts replies and documents to an UltraMsg-style
//! gateway and `HttpQuoteGenerator` hands the normalised form to the
//! portal-filing service. Neither ever returns an error to the engine: failures become
//! `false` or a failed `QuoteOutcome`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use quote_intake_core::{FieldValues, MessageSender, OutboundDocument, QuoteGenerator, QuoteOutcome};

use crate::ServerError;

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

fn build_client(timeout: Duration) -> Result<Client, ServerError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ServerError::Internal(format!("HTTP client: {}", e)))
}

#[derive(Serialize)]
struct TextRequest<'a> {
    token: &'a str,
    to: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct DocumentRequest<'a> {
    token: &'a str,
    to: &'a str,
    document: &'a str,
    filename: &'a str,
    caption: &'a str,
}

/// Gateway client; `base_url` is the instance root, e.g.
/// `https://api.ultramsg.com/instance123`
pub struct HttpMessageSender {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpMessageSender {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ServerError> {
        Ok(Self {
            client: build_client(SEND_TIMEOUT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, contact_id: &str, payload: &T) -> bool {
        let url = format!("{}/{}", self.base_url, path);
        match self.client.post(&url).json(payload).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(contact_id = %contact_id, path, status = %resp.status(), "Gateway rejected message");
                false
            }
            Err(e) => {
                tracing::warn!(contact_id = %contact_id, path, error = %e, "Gateway unreachable");
                false
            }
        }
    }
}

#[async_trait]
impl MessageSender for HttpMessageSender {
    async fn send(&self, contact_id: &str, text: &str) -> bool {
        let request = TextRequest {
            token: &self.token,
            to: contact_id,
            body: text,
        };
        self.post("messages/chat", contact_id, &request).await
    }

    async fn send_document(&self, contact_id: &str, document: &OutboundDocument) -> bool {
        let request = DocumentRequest {
            token: &self.token,
            to: contact_id,
            document: &document.url,
            filename: &document.filename,
            caption: &document.caption,
        };
        self.post("messages/document", contact_id, &request).await
    }
}

#[derive(Serialize)]
struct QuoteRequest<'a> {
    fields: &'a FieldValues,
}

pub struct HttpQuoteGenerator {
    client: Client,
    endpoint: String,
}

impl HttpQuoteGenerator {
    /// `timeout` should not exceed the engine's own quote budget
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServerError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl QuoteGenerator for HttpQuoteGenerator {
    async fn generate(&self, fields: &FieldValues) -> QuoteOutcome {
        let resp = match self
            .client
            .post(&self.endpoint)
            .json(&QuoteRequest { fields })
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return QuoteOutcome::failed(format!("quote service unreachable: {}", e)),
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return QuoteOutcome::failed(format!("quote service returned {}: {}", status, body));
        }

        match resp.json::<QuoteOutcome>().await {
            Ok(outcome) => outcome,
            Err(e) => QuoteOutcome::failed(format!("unreadable quote service response: {}", e)),
        }
    }
}

/// Stand-in when no quote service is configured
pub struct UnconfiguredQuoteGenerator;

#[async_trait]
impl QuoteGenerator for UnconfiguredQuoteGenerator {
    async fn generate(&self, _fields: &FieldValues) -> QuoteOutcome {
        QuoteOutcome::failed("quote service endpoint is not configured")
    }
}
