//! Field schema for the intake form
//!
//! The schema lists every field the form needs, grouped into display
//! sections. Each field has a display name, a validator (`FieldKind`) and
//! an ordered list of extraction patterns used by the deterministic
//! extractor.
//!
//! Validation is pure: `validate(key, value)` either returns the normalized
//! value or a reason, and never touches session state.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::OnceCell;
use quote_intake_core::FieldValues;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::keywords::normalize_input;
use crate::ConfigError;

const BUILTIN_SCHEMA: &str = include_str!("../fields/equine_quote.yaml");

static BUILTIN: OnceCell<Arc<FieldSchema>> = OnceCell::new();

/// A value rejected by a field validator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct FieldValidationError {
    pub field: String,
    pub reason: String,
}

impl From<FieldValidationError> for quote_intake_core::Error {
    fn from(err: FieldValidationError) -> Self {
        quote_intake_core::Error::FieldValidation {
            field: err.field,
            reason: err.reason,
        }
    }
}

/// Validation rule of a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text with a length window (in characters)
    Text {
        #[serde(default = "default_text_min")]
        min_len: usize,
        #[serde(default = "default_text_max")]
        max_len: usize,
    },
    /// Digits only after stripping `.`, `-`, `/` and spaces
    Digits { min_len: usize, max_len: usize },
    /// Calendar date, normalized to DD/MM/YYYY
    Date {
        formats: Vec<String>,
        min_year: i32,
        max_year: i32,
    },
    /// Closed allow-list; output is the canonical value
    Enumerated {
        values: Vec<String>,
        #[serde(default)]
        aliases: HashMap<String, String>,
    },
    /// Positive amount, pt-BR or plain separators, normalized to `1234.50`
    Money,
}

fn default_text_min() -> usize {
    1
}

fn default_text_max() -> usize {
    200
}

impl FieldKind {
    /// Normalize `raw` or explain why it is not acceptable
    pub fn normalize(&self, raw: &str) -> Result<String, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("valor vazio".to_string());
        }

        match self {
            FieldKind::Text { min_len, max_len } => {
                let value = raw
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .trim_end_matches(|c: char| c == '.' || c == ',' || c == ';')
                    .to_string();
                let len = value.chars().count();
                if len < *min_len {
                    return Err(format!("muito curto (mínimo {} caracteres)", min_len));
                }
                if len > *max_len {
                    return Err(format!("muito longo (máximo {} caracteres)", max_len));
                }
                if !value.chars().any(char::is_alphanumeric) {
                    return Err("sem letras ou números".to_string());
                }
                Ok(value)
            }
            FieldKind::Digits { min_len, max_len } => {
                if let Some(bad) = raw
                    .chars()
                    .find(|c| !c.is_ascii_digit() && !matches!(c, '.' | '-' | '/' | ' '))
                {
                    return Err(format!("caractere inválido '{}'", bad));
                }
                let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
                let len = digits.len();
                if len < *min_len || len > *max_len {
                    return Err(if min_len == max_len {
                        format!("deve ter {} dígitos", min_len)
                    } else {
                        format!("deve ter entre {} e {} dígitos", min_len, max_len)
                    });
                }
                Ok(digits)
            }
            FieldKind::Date {
                formats,
                min_year,
                max_year,
            } => {
                let date = formats
                    .iter()
                    .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                    .ok_or_else(|| "data inválida, use DD/MM/AAAA".to_string())?;
                if date.year() < *min_year || date.year() > *max_year {
                    return Err(format!(
                        "ano fora do intervalo {}-{}",
                        min_year, max_year
                    ));
                }
                Ok(date.format("%d/%m/%Y").to_string())
            }
            FieldKind::Enumerated { values, aliases } => {
                let wanted = normalize_input(raw);
                if let Some(value) = values.iter().find(|v| normalize_input(v) == wanted) {
                    return Ok(value.clone());
                }
                aliases
                    .iter()
                    .find(|(alias, _)| normalize_input(alias) == wanted)
                    .map(|(_, canonical)| canonical.clone())
                    .ok_or_else(|| format!("valor não permitido '{}'", raw))
            }
            FieldKind::Money => {
                let cents = parse_money(raw)?;
                Ok(format!("{}.{:02}", cents / 100, cents % 100))
            }
        }
    }
}

/// Parse a monetary amount into cents.
///
/// Accepts `R$ 50.000,00`, `50000`, `50,000.00`, `50000.5`. A single
/// separator followed by one or two digits is the decimal separator,
/// anything else is a thousands separator.
fn parse_money(raw: &str) -> Result<u64, String> {
    let lowered = raw.to_lowercase();
    let cleaned: String = lowered
        .replace("r$", "")
        .replace("reais", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return Err("não é um valor numérico".to_string());
    }
    if cleaned
        .chars()
        .any(|c| !c.is_ascii_digit() && c != '.' && c != ',')
    {
        return Err("não é um valor numérico".to_string());
    }

    let last_sep = cleaned.rfind(|c| c == '.' || c == ',');
    let (int_part, frac_part) = match last_sep {
        None => (cleaned.clone(), String::new()),
        Some(pos) => {
            let sep = &cleaned[pos..pos + 1];
            let tail = &cleaned[pos + 1..];
            let sep_count = cleaned.matches(sep).count();
            let other_present = cleaned.contains(if sep == "," { '.' } else { ',' });
            let is_decimal = (1..=2).contains(&tail.len()) && (sep_count == 1 || other_present);
            if is_decimal {
                (cleaned[..pos].replace(['.', ','], ""), tail.to_string())
            } else {
                (cleaned.replace(['.', ','], ""), String::new())
            }
        }
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err("não é um valor numérico".to_string());
    }

    let units: u64 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| "valor muito alto".to_string())?
    };
    let frac: u64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<u64>().map_err(|e| e.to_string())? * 10,
        _ => frac_part.parse::<u64>().map_err(|e| e.to_string())?,
    };

    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(frac))
        .ok_or_else(|| "valor muito alto".to_string())?;
    if cents == 0 {
        return Err("deve ser maior que zero".to_string());
    }
    Ok(cents)
}

/// Display grouping for fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub key: String,
    pub title: String,
}

/// Serialized field definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub key: String,
    pub display_name: String,
    pub section: String,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    pub kind: FieldKind,
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn default_required() -> bool {
    true
}

/// Serialized schema document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub name: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    pub fields: Vec<FieldDefinition>,
}

/// A compiled field
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub key: String,
    pub display_name: String,
    pub section: String,
    pub hint: Option<String>,
    pub required: bool,
    pub kind: FieldKind,
    pub patterns: Vec<Regex>,
}

impl FieldSpec {
    /// Display name with the format hint, e.g. "Data de Nascimento (DD/MM/AAAA)"
    pub fn label(&self) -> String {
        match &self.hint {
            Some(hint) => format!("{} ({})", self.display_name, hint),
            None => self.display_name.clone(),
        }
    }

    pub fn validate(&self, value: &str) -> Result<String, FieldValidationError> {
        self.kind.normalize(value).map_err(|reason| FieldValidationError {
            field: self.key.clone(),
            reason,
        })
    }
}

/// Compiled, read-only intake schema shared by all sessions
#[derive(Debug, Clone)]
pub struct FieldSchema {
    name: String,
    sections: Vec<Section>,
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    /// The embedded equine quote schema
    pub fn builtin() -> Result<Arc<FieldSchema>, ConfigError> {
        BUILTIN
            .get_or_try_init(|| Self::from_yaml_str(BUILTIN_SCHEMA).map(Arc::new))
            .cloned()
    }

    /// Load from `path` when given, otherwise the embedded schema
    pub fn load(path: Option<&str>) -> Result<Arc<FieldSchema>, ConfigError> {
        match path {
            Some(p) if !p.trim().is_empty() => Self::from_path(p).map(Arc::new),
            _ => Self::builtin(),
        }
    }

    /// Load a YAML (`.yaml`/`.yml`) or TOML (`.toml`) schema file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let doc: SchemaDocument = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("field schema: {}", e)))?;
        Self::compile(doc)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let doc: SchemaDocument = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("field schema: {}", e)))?;
        Self::compile(doc)
    }

    /// Check the document and compile its patterns
    pub fn compile(doc: SchemaDocument) -> Result<Self, ConfigError> {
        if doc.fields.is_empty() {
            return Err(ConfigError::MissingField("fields".to_string()));
        }

        let section_keys: HashSet<&str> = doc.sections.iter().map(|s| s.key.as_str()).collect();
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(doc.fields.len());

        for def in doc.fields {
            let field_path = format!("fields.{}", def.key);
            if def.key.trim().is_empty() {
                return Err(ConfigError::MissingField("fields[].key".to_string()));
            }
            if !seen.insert(def.key.clone()) {
                return Err(ConfigError::InvalidValue {
                    field: field_path,
                    message: "duplicate field key".to_string(),
                });
            }
            if !section_keys.is_empty() && !section_keys.contains(def.section.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: field_path,
                    message: format!("unknown section '{}'", def.section),
                });
            }
            check_kind(&field_path, &def.kind)?;

            let mut patterns = Vec::with_capacity(def.patterns.len());
            for source in &def.patterns {
                let regex = RegexBuilder::new(source)
                    .case_insensitive(true)
                    .multi_line(true)
                    .build()
                    .map_err(|e| ConfigError::InvalidValue {
                        field: format!("{}.patterns", field_path),
                        message: e.to_string(),
                    })?;
                if regex.captures_len() < 2 {
                    return Err(ConfigError::InvalidValue {
                        field: format!("{}.patterns", field_path),
                        message: format!("pattern has no capture group: {}", source),
                    });
                }
                patterns.push(regex);
            }

            fields.push(FieldSpec {
                key: def.key,
                display_name: def.display_name,
                section: def.section,
                hint: def.hint,
                required: def.required,
                kind: def.kind,
                patterns,
            });
        }

        tracing::debug!(schema = %doc.name, fields = fields.len(), "Compiled field schema");

        Ok(Self {
            name: doc.name,
            sections: doc.sections,
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// All fields in schema order
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn required(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Fields of one section, in schema order
    pub fn section_fields<'a>(&'a self, section: &'a str) -> impl Iterator<Item = &'a FieldSpec> {
        self.fields.iter().filter(move |f| f.section == section)
    }

    /// Validate and normalize a candidate value for `key`
    pub fn validate(&self, key: &str, value: &str) -> Result<String, FieldValidationError> {
        match self.field(key) {
            Some(spec) => spec.validate(value),
            None => Err(FieldValidationError {
                field: key.to_string(),
                reason: "campo desconhecido".to_string(),
            }),
        }
    }

    /// A stored value is valid when it validates to itself
    pub fn is_valid(&self, key: &str, value: &str) -> bool {
        self.validate(key, value).is_ok()
    }

    /// Required fields that are absent or invalid, in schema order
    pub fn missing(&self, fields: &FieldValues) -> Vec<&FieldSpec> {
        self.required()
            .filter(|spec| match fields.get(&spec.key) {
                Some(value) => spec.validate(value).is_err(),
                None => true,
            })
            .collect()
    }

    pub fn missing_keys(&self, fields: &FieldValues) -> Vec<String> {
        self.missing(fields).into_iter().map(|f| f.key.clone()).collect()
    }

    /// Every required field present and passing its validator
    pub fn is_complete(&self, fields: &FieldValues) -> bool {
        self.missing(fields).is_empty()
    }
}

fn check_kind(field_path: &str, kind: &FieldKind) -> Result<(), ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        field: format!("{}.kind", field_path),
        message: message.to_string(),
    };

    match kind {
        FieldKind::Text { min_len, max_len } | FieldKind::Digits { min_len, max_len } => {
            if min_len > max_len {
                return Err(invalid("min_len greater than max_len"));
            }
        }
        FieldKind::Date {
            formats,
            min_year,
            max_year,
        } => {
            if formats.is_empty() {
                return Err(invalid("date needs at least one format"));
            }
            if min_year > max_year {
                return Err(invalid("min_year greater than max_year"));
            }
        }
        FieldKind::Enumerated { values, aliases } => {
            if values.is_empty() {
                return Err(invalid("enumerated needs at least one value"));
            }
            if let Some((alias, target)) = aliases.iter().find(|(_, t)| !values.contains(t)) {
                return Err(invalid(&format!(
                    "alias '{}' points to unknown value '{}'",
                    alias, target
                )));
            }
        }
        FieldKind::Money => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn schema() -> Arc<FieldSchema> {
        FieldSchema::builtin().unwrap()
    }

    fn complete_fields() -> FieldValues {
        [
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
            ("cep", "13010000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_builtin_schema_compiles() {
        let schema = schema();
        assert_eq!(schema.name(), "equine_quote");
        assert_eq!(schema.required().count(), 14);
        assert_eq!(schema.sections().len(), 3);
        assert!(schema.fields().iter().all(|f| !f.patterns.is_empty()));
    }

    #[test]
    fn test_digits_strip_separators() {
        let schema = schema();
        assert_eq!(schema.validate("cpf_solicitante", "123.456.789-01").unwrap(), "12345678901");
        assert_eq!(schema.validate("cep", "13010-000").unwrap(), "13010000");
        assert!(schema.validate("cep", "1301000").is_err());
        assert!(schema.validate("cpf_solicitante", "123abc").is_err());
    }

    #[test]
    fn test_date_formats_and_range() {
        let schema = schema();
        assert_eq!(schema.validate("data_nascimento", "1/5/2018").unwrap(), "01/05/2018");
        assert_eq!(schema.validate("data_nascimento", "10-05-2018").unwrap(), "10/05/2018");
        assert!(schema.validate("data_nascimento", "31/02/2018").is_err());
        assert!(schema.validate("data_nascimento", "10/05/1850").is_err());
        assert!(schema.validate("data_nascimento", "ontem").is_err());
    }

    #[test]
    fn test_enumerated_case_and_aliases() {
        let schema = schema();
        assert_eq!(schema.validate("uf", "sp").unwrap(), "SP");
        assert!(schema.validate("uf", "XX").is_err());
        assert_eq!(schema.validate("sexo", "FEMEA").unwrap(), "fêmea");
        assert_eq!(schema.validate("sexo", "égua").unwrap(), "fêmea");
        assert_eq!(schema.validate("sexo", "Macho").unwrap(), "inteiro");
    }

    #[test]
    fn test_money_normalization() {
        let schema = schema();
        assert_eq!(schema.validate("valor_animal", "R$ 50.000,00").unwrap(), "50000.00");
        assert_eq!(schema.validate("valor_animal", "50000").unwrap(), "50000.00");
        assert_eq!(schema.validate("valor_animal", "50.000").unwrap(), "50000.00");
        assert_eq!(schema.validate("valor_animal", "1.250.000").unwrap(), "1250000.00");
        assert_eq!(schema.validate("valor_animal", "7500,5").unwrap(), "7500.50");
        assert_eq!(schema.validate("valor_animal", "50,000.00").unwrap(), "50000.00");
        assert_eq!(schema.validate("valor_animal", "80000 reais").unwrap(), "80000.00");
        assert!(schema.validate("valor_animal", "cinquenta mil").is_err());
        assert!(schema.validate("valor_animal", "0,00").is_err());
        assert!(schema.validate("valor_animal", "R$").is_err());
    }

    #[test]
    fn test_validate_is_idempotent_on_normalized_values() {
        let schema = schema();
        for (key, value) in complete_fields() {
            assert_eq!(schema.validate(&key, &value).unwrap(), value, "field {}", key);
        }
    }

    #[test]
    fn test_missing_in_schema_order_and_stable() {
        let schema = schema();
        let mut fields = complete_fields();
        fields.remove("cep");
        fields.remove("cpf_solicitante");
        fields.insert("uf".into(), "ZZ".into());

        let first = schema.missing_keys(&fields);
        let second = schema.missing_keys(&fields);
        assert_eq!(first, vec!["cpf_solicitante", "uf", "cep"]);
        assert_eq!(first, second);
        assert!(!schema.is_complete(&fields));
    }

    #[test]
    fn test_complete_when_all_required_valid() {
        let schema = schema();
        assert!(schema.is_complete(&complete_fields()));
        assert!(!schema.is_complete(&FieldValues::new()));
    }

    #[test]
    fn test_rejects_duplicate_keys_and_bad_patterns() {
        let dup = r#"
name: broken
fields:
  - { key: a, display_name: A, section: x, kind: { type: money } }
  - { key: a, display_name: A, section: x, kind: { type: money } }
"#;
        assert!(FieldSchema::from_yaml_str(dup).is_err());

        let no_group = r#"
name: broken
fields:
  - key: a
    display_name: A
    section: x
    kind: { type: money }
    patterns: ['valor\s+\d+']
"#;
        assert!(FieldSchema::from_yaml_str(no_group).is_err());
    }

    #[test]
    fn test_load_toml_schema_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
name = "mini"

[[sections]]
key = "s"
title = "Dados"

[[fields]]
key = "cep"
display_name = "CEP"
section = "s"
patterns = ['cep\s*(\d{{8}})']

[fields.kind]
type = "digits"
min_len = 8
max_len = 8
"#
        )
        .unwrap();

        let schema = FieldSchema::from_path(file.path()).unwrap();
        assert_eq!(schema.name(), "mini");
        assert_eq!(schema.validate("cep", "01310-100").unwrap(), "01310100");
    }
}
