//! Field extraction strategies
//!
//! Both strategies satisfy `Extractor::extract(text, existing) -> candidates`.
//! Candidates are raw strings; normalization and the final validity check
//! happen in [`crate::merge`]. Pattern matching only uses validation to
//! prefer a capture the field would accept.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use quote_intake_config::{ExtractionConfig, ExtractionStrategy, FieldKind, FieldSchema};
use quote_intake_core::{ExtractionService, FieldValues};

/// Longest message treated as a bare answer to a single outstanding field
const BARE_ANSWER_MAX_CHARS: usize = 64;

/// Turns free text into candidate field values
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Candidates for fields absent or invalid in `existing`
    async fn extract(&self, text: &str, existing: &FieldValues) -> FieldValues;

    fn name(&self) -> &'static str;
}

/// Deterministic extraction from schema patterns
///
/// For each field that is absent or invalid in `existing`, every match of
/// the field's patterns is tried in order and the first capture that
/// validates wins. When none validates, the first capture is still returned
/// so the merge can report it as invalid. When nothing
/// matched and exactly one strictly-typed field is outstanding, a short
/// single-line message is taken as the answer for it.
pub struct PatternExtractor {
    schema: Arc<FieldSchema>,
}

impl PatternExtractor {
    pub fn new(schema: Arc<FieldSchema>) -> Self {
        Self { schema }
    }

    pub fn extract_fields(&self, text: &str, existing: &FieldValues) -> FieldValues {
        let mut candidates = FieldValues::new();

        for spec in self.schema.fields() {
            let already_valid = existing
                .get(&spec.key)
                .map_or(false, |value| spec.validate(value).is_ok());
            if already_valid {
                continue;
            }

            let mut first = None;
            let mut accepted = None;
            'patterns: for pattern in &spec.patterns {
                for caps in pattern.captures_iter(text) {
                    let Some(value) = caps.get(1).map(|m| m.as_str().trim()).filter(|v| !v.is_empty())
                    else {
                        continue;
                    };
                    if spec.validate(value).is_ok() {
                        accepted = Some(value);
                        break 'patterns;
                    }
                    first.get_or_insert(value);
                }
            }

            if let Some(value) = accepted.or(first) {
                candidates.insert(spec.key.clone(), value.to_string());
            }
        }

        if candidates.is_empty() {
            if let Some((key, value)) = self.bare_answer(text, existing) {
                candidates.insert(key, value);
            }
        }

        candidates
    }

    fn bare_answer(&self, text: &str, existing: &FieldValues) -> Option<(String, String)> {
        let text = text.trim();
        if text.is_empty() || text.contains('\n') || text.chars().count() > BARE_ANSWER_MAX_CHARS {
            return None;
        }

        let missing = self.schema.missing(existing);
        match missing.as_slice() {
            [only] if !matches!(only.kind, FieldKind::Text { .. }) => {
                Some((only.key.clone(), text.to_string()))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Extractor for PatternExtractor {
    async fn extract(&self, text: &str, existing: &FieldValues) -> FieldValues {
        self.extract_fields(text, existing)
    }

    fn name(&self) -> &'static str {
        "deterministic"
    }
}

/// Extraction through an external service, with pattern fallback
///
/// Service errors, malformed replies and timeouts all fall back to the
/// deterministic strategy for that call.
pub struct AssistedExtractor {
    service: Arc<dyn ExtractionService>,
    fallback: PatternExtractor,
    timeout: Duration,
}

impl AssistedExtractor {
    pub fn new(
        service: Arc<dyn ExtractionService>,
        schema: Arc<FieldSchema>,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            fallback: PatternExtractor::new(schema),
            timeout,
        }
    }
}

#[async_trait]
impl Extractor for AssistedExtractor {
    async fn extract(&self, text: &str, existing: &FieldValues) -> FieldValues {
        match tokio::time::timeout(self.timeout, self.service.extract(text, existing)).await {
            Ok(Ok(fields)) => fields,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Assisted extraction failed, using patterns");
                metrics::counter!("intake_extraction_fallbacks_total", "reason" => "error")
                    .increment(1);
                self.fallback.extract_fields(text, existing)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Assisted extraction timed out, using patterns"
                );
                metrics::counter!("intake_extraction_fallbacks_total", "reason" => "timeout")
                    .increment(1);
                self.fallback.extract_fields(text, existing)
            }
        }
    }

    fn name(&self) -> &'static str {
        "assisted"
    }
}

/// Select the extractor for the configured strategy
pub fn build_extractor(
    config: &ExtractionConfig,
    schema: Arc<FieldSchema>,
    service: Option<Arc<dyn ExtractionService>>,
) -> Arc<dyn Extractor> {
    match (config.strategy, service) {
        (ExtractionStrategy::Assisted, Some(service)) => {
            Arc::new(AssistedExtractor::new(service, schema, config.timeout()))
        }
        (ExtractionStrategy::Assisted, None) => {
            tracing::warn!("Assisted extraction configured without a service, using patterns");
            Arc::new(PatternExtractor::new(schema))
        }
        (ExtractionStrategy::Deterministic, _) => Arc::new(PatternExtractor::new(schema)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote_intake_core::{Error, Result};

    fn schema() -> Arc<FieldSchema> {
        FieldSchema::builtin().unwrap()
    }

    fn extract(text: &str) -> FieldValues {
        PatternExtractor::new(schema()).extract_fields(text, &FieldValues::new())
    }

    #[test]
    fn test_extracts_labeled_fields() {
        let fields = extract(
            "Nome completo: Maria Souza\nCPF: 123.456.789-01\nNome do animal: Trovão\n\
             Valor: R$ 50.000,00\nRaça: Mangalarga Marchador\nNascimento: 10/05/2018\n\
             Sexo: fêmea\nUtilização: lazer",
        );
        assert_eq!(fields["nome_solicitante"], "Maria Souza");
        assert_eq!(fields["cpf_solicitante"], "123.456.789-01");
        assert_eq!(fields["nome_animal"], "Trovão");
        assert_eq!(fields["valor_animal"], "R$ 50.000,00");
        assert_eq!(fields["raca"], "Mangalarga Marchador");
        assert_eq!(fields["data_nascimento"], "10/05/2018");
        assert_eq!(fields["sexo"], "fêmea");
        assert_eq!(fields["utilizacao"], "lazer");
    }

    #[test]
    fn test_skips_capture_the_field_rejects() {
        // "sexo está" is caught by the labelled pattern first
        let fields = extract("o sexo está errado, é castrado");
        assert_eq!(fields["sexo"], "castrado");
    }

    #[test]
    fn test_keeps_invalid_capture_when_nothing_validates() {
        let fields = extract("Sexo: potro");
        assert_eq!(fields["sexo"], "potro");
    }

    #[test]
    fn test_extracts_address_line() {
        let fields = extract("Rua das Flores, 123, bairro Centro, cidade Campinas - SP, CEP 13010-000");
        assert_eq!(fields["rua"], "Rua das Flores");
        assert_eq!(fields["numero"], "123");
        assert_eq!(fields["bairro"], "Centro");
        assert_eq!(fields["cidade"], "Campinas");
        assert_eq!(fields["uf"], "SP");
        assert_eq!(fields["cep"], "13010-000");
    }

    #[test]
    fn test_unlabeled_cpf_digits_do_not_become_cep() {
        let fields = extract("cpf 12345678901");
        assert_eq!(fields.get("cpf_solicitante").map(String::as_str), Some("12345678901"));
        assert!(!fields.contains_key("cep"));
    }

    #[test]
    fn test_skips_fields_already_valid() {
        let mut existing = FieldValues::new();
        existing.insert("cep".into(), "13010000".into());
        let fields = PatternExtractor::new(schema()).extract_fields("CEP 04567-000", &existing);
        assert!(!fields.contains_key("cep"));

        existing.insert("cep".into(), "123".into());
        let fields = PatternExtractor::new(schema()).extract_fields("CEP 04567-000", &existing);
        assert_eq!(fields["cep"], "04567-000");
    }

    #[test]
    fn test_bare_answer_for_single_outstanding_field() {
        let schema = schema();
        let mut existing = FieldValues::new();
        for (k, v) in [
            ("nome_solicitante", "Maria Souza"),
            ("cpf_solicitante", "12345678901"),
            ("nome_animal", "Trovão"),
            ("valor_animal", "50000.00"),
            ("raca", "Mangalarga"),
            ("data_nascimento", "10/05/2018"),
            ("sexo", "fêmea"),
            ("utilizacao", "lazer"),
            ("rua", "Rua das Flores"),
            ("numero", "123"),
            ("bairro", "Centro"),
            ("cidade", "Campinas"),
            ("uf", "SP"),
        ] {
            existing.insert(k.into(), v.into());
        }

        let extractor = PatternExtractor::new(schema.clone());
        let fields = extractor.extract_fields("13010000", &existing);
        assert_eq!(fields["cep"], "13010000");

        // a free-text field is never filled from a bare answer
        existing.insert("cep".into(), "13010000".into());
        existing.remove("bairro");
        assert!(extractor.extract_fields("ok", &existing).is_empty());
    }

    struct FixedService(Result<FieldValues>);

    #[async_trait]
    impl ExtractionService for FixedService {
        async fn extract(&self, _text: &str, _existing: &FieldValues) -> Result<FieldValues> {
            self.0.clone()
        }
    }

    struct SlowService;

    #[async_trait]
    impl ExtractionService for SlowService {
        async fn extract(&self, _text: &str, _existing: &FieldValues) -> Result<FieldValues> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(FieldValues::new())
        }
    }

    #[tokio::test]
    async fn test_assisted_uses_service_result() {
        let mut reply = FieldValues::new();
        reply.insert("raca".into(), "Crioulo".into());
        let extractor =
            AssistedExtractor::new(Arc::new(FixedService(Ok(reply))), schema(), Duration::from_secs(1));

        let fields = extractor.extract("CEP 13010-000", &FieldValues::new()).await;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["raca"], "Crioulo");
    }

    #[tokio::test]
    async fn test_assisted_falls_back_on_error() {
        let extractor = AssistedExtractor::new(
            Arc::new(FixedService(Err(Error::Extraction("bad json".into())))),
            schema(),
            Duration::from_secs(1),
        );
        let fields = extractor.extract("CEP 13010-000", &FieldValues::new()).await;
        assert_eq!(fields["cep"], "13010-000");
    }

    #[tokio::test]
    async fn test_assisted_falls_back_on_timeout() {
        let extractor =
            AssistedExtractor::new(Arc::new(SlowService), schema(), Duration::from_millis(20));
        let fields = extractor.extract("UF: MG", &FieldValues::new()).await;
        assert_eq!(fields["uf"], "MG");
    }

    #[test]
    fn test_build_extractor_selects_strategy() {
        let mut config = ExtractionConfig::default();
        assert_eq!(build_extractor(&config, schema(), None).name(), "deterministic");

        config.strategy = ExtractionStrategy::Assisted;
        assert_eq!(build_extractor(&config, schema(), None).name(), "deterministic");

        let service: Arc<dyn ExtractionService> = Arc::new(FixedService(Ok(FieldValues::new())));
        assert_eq!(build_extractor(&config, schema(), Some(service)).name(), "assisted");
    }
}
