//! Text blocks describing the intake form
//!
//! Required-field lists, collected/missing progress and the confirmation
//! summary, all in schema order and grouped by section where shown to the
//! contact. Schemas without sections render as one flat list.

use std::sync::Arc;

use quote_intake_config::{FieldKind, FieldSchema, FieldSpec};
use quote_intake_core::FieldValues;

#[derive(Debug, Clone)]
pub struct FormRenderer {
    schema: Arc<FieldSchema>,
}

impl FormRenderer {
    pub fn new(schema: Arc<FieldSchema>) -> Self {
        Self { schema }
    }

    /// Every required field, grouped by section when the schema has any
    pub fn required_list(&self) -> String {
        self.by_section(|spec| spec.required.then(|| format!("• {}", spec.label())))
    }

    /// Valid collected values as "✅ Name: value"
    pub fn collected(&self, fields: &FieldValues) -> String {
        self.schema
            .fields()
            .iter()
            .filter_map(|spec| {
                valid_value(spec, fields).map(|value| {
                    format!("✅ {}: {}", spec.display_name, display_value(spec, &value))
                })
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Outstanding required fields as "❌ label"
    pub fn missing(&self, fields: &FieldValues) -> String {
        self.schema
            .missing(fields)
            .iter()
            .map(|spec| format!("❌ {}", spec.label()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Confirmation summary, grouped by section
    pub fn summary(&self, fields: &FieldValues) -> String {
        self.by_section(|spec| {
            valid_value(spec, fields)
                .map(|value| format!("• {}: {}", spec.display_name, display_value(spec, &value)))
        })
    }

    fn by_section<F>(&self, line: F) -> String
    where
        F: Fn(&FieldSpec) -> Option<String>,
    {
        if self.schema.sections().is_empty() {
            return self
                .schema
                .fields()
                .iter()
                .filter_map(&line)
                .collect::<Vec<_>>()
                .join("\n");
        }

        let mut blocks = Vec::new();
        for section in self.schema.sections() {
            let lines: Vec<String> = self.schema.section_fields(&section.key).filter_map(&line).collect();
            if lines.is_empty() {
                continue;
            }
            if section.title.trim().is_empty() {
                blocks.push(lines.join("\n"));
            } else {
                blocks.push(format!("*{}:*\n{}", section.title, lines.join("\n")));
            }
        }
        blocks.join("\n\n")
    }
}

fn valid_value(spec: &FieldSpec, fields: &FieldValues) -> Option<String> {
    fields.get(&spec.key).and_then(|value| spec.validate(value).ok())
}

fn display_value(spec: &FieldSpec, value: &str) -> String {
    match spec.kind {
        FieldKind::Money => format_brl(value).unwrap_or_else(|| value.to_string()),
        _ => value.to_string(),
    }
}

/// "50000.00" -> "R$ 50.000,00"
fn format_brl(value: &str) -> Option<String> {
    let (int_part, cents) = value.split_once('.')?;
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::new();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*c);
    }
    Some(format!("R$ {},{}", grouped, cents))
}
