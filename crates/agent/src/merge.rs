//! Merge rule for extracted candidates
//!
//! A candidate is validated first and dropped when invalid. A valid candidate
//! is written when the field is absent or currently invalid, or when the
//! contact asked to correct the summary. A field that already holds a valid
//! value is otherwise left alone.

use quote_intake_config::FieldSchema;
use quote_intake_core::FieldValues;

/// What happened to each candidate of one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Keys written to the session
    pub accepted: Vec<String>,
    /// Keys whose candidate failed validation, with the reason
    pub rejected: Vec<(String, String)>,
    /// Keys left unchanged (unknown key, already valid, same value)
    pub ignored: Vec<String>,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        !self.accepted.is_empty()
    }
}

pub fn merge_candidates(
    schema: &FieldSchema,
    fields: &mut FieldValues,
    candidates: FieldValues,
    allow_overwrite: bool,
) -> MergeReport {
    let mut report = MergeReport::default();

    let mut candidates: Vec<_> = candidates.into_iter().collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    for (key, raw) in candidates {
        let Some(spec) = schema.field(&key) else {
            report.ignored.push(key);
            continue;
        };

        let value = match spec.validate(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(field = %key, reason = %e.reason, "Dropping invalid candidate");
                report.rejected.push((key, e.reason));
                continue;
            }
        };

        let write = match fields.get(&key).filter(|current| spec.validate(current).is_ok()) {
            Some(current) if *current == value => false,
            Some(_) => allow_overwrite,
            None => true,
        };

        if write {
            fields.insert(key.clone(), value);
            report.accepted.push(key);
        } else {
            report.ignored.push(key);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn schema() -> Arc<FieldSchema> {
        FieldSchema::builtin().unwrap()
    }

    fn candidates(pairs: &[(&str, &str)]) -> FieldValues {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_writes_normalized_values() {
        let mut fields = FieldValues::new();
        let report = merge_candidates(
            &schema(),
            &mut fields,
            candidates(&[("cep", "13010-000"), ("uf", "sp")]),
            false,
        );
        assert_eq!(report.accepted, vec!["cep", "uf"]);
        assert_eq!(fields["cep"], "13010000");
        assert_eq!(fields["uf"], "SP");
    }

    #[test]
    fn test_invalid_candidate_not_written() {
        let mut fields = FieldValues::new();
        let report = merge_candidates(
            &schema(),
            &mut fields,
            candidates(&[("valor_animal", "cinquenta mil")]),
            false,
        );
        assert!(fields.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "valor_animal");
    }

    #[test]
    fn test_valid_field_not_overwritten_without_correction() {
        let mut fields = candidates(&[("cep", "13010000")]);
        let report =
            merge_candidates(&schema(), &mut fields, candidates(&[("cep", "04567-000")]), false);
        assert_eq!(fields["cep"], "13010000");
        assert_eq!(report.ignored, vec!["cep"]);
    }

    #[test]
    fn test_invalid_stored_value_is_replaced() {
        let mut fields = candidates(&[("cep", "130")]);
        merge_candidates(&schema(), &mut fields, candidates(&[("cep", "04567-000")]), false);
        assert_eq!(fields["cep"], "04567000");
    }

    #[test]
    fn test_correction_overwrites() {
        let mut fields = candidates(&[("cep", "13010000")]);
        let report =
            merge_candidates(&schema(), &mut fields, candidates(&[("cep", "04567-000")]), true);
        assert_eq!(fields["cep"], "04567000");
        assert!(report.changed());
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let mut fields = FieldValues::new();
        let report =
            merge_candidates(&schema(), &mut fields, candidates(&[("telefone", "1199")]), true);
        assert!(fields.is_empty());
        assert_eq!(report.ignored, vec!["telefone"]);
    }

    #[test]
    fn test_repeated_merge_is_stable() {
        let schema = schema();
        let input = candidates(&[("cep", "13010-000"), ("raca", "Crioulo")]);
        let mut fields = FieldValues::new();
        merge_candidates(&schema, &mut fields, input.clone(), false);
        let after_first = fields.clone();
        let report = merge_candidates(&schema, &mut fields, input, false);
        assert_eq!(fields, after_first);
        assert!(!report.changed());
    }
}
