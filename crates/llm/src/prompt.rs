//! Prompt building for structured extraction

use serde::{Deserialize, Serialize};
use std::fmt;

use quote_intake_config::{FieldKind, FieldSchema};
use quote_intake_core::FieldValues;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Builds the strict extraction prompt for one schema
///
/// The system message lists each key with its expected format and the
/// values already collected, and requires a bare JSON object with only the
/// fields the contact explicitly wrote.
pub struct ExtractionPrompt<'a> {
    schema: &'a FieldSchema,
}

impl<'a> ExtractionPrompt<'a> {
    pub fn new(schema: &'a FieldSchema) -> Self {
        Self { schema }
    }

    pub fn build(&self, text: &str, existing: &FieldValues) -> Vec<Message> {
        vec![
            Message::system(self.system_message(existing)),
            Message::user(text.to_string()),
        ]
    }

    fn system_message(&self, existing: &FieldValues) -> String {
        let mut out = String::from(
            "Você extrai dados de um formulário de cotação de seguro a partir de mensagens de WhatsApp.\n\
             Regras:\n\
             - Extraia APENAS campos explicitamente presentes na mensagem.\n\
             - NUNCA invente, deduza ou complete valores.\n\
             - Use somente as chaves listadas abaixo.\n\
             - Responda APENAS com um objeto JSON plano de strings, sem texto adicional.\n\
             - Se nenhum campo estiver presente, responda {}.\n\n\
             Campos:\n",
        );

        for field in self.schema.fields() {
            out.push_str(&format!(
                "- {}: {}{}\n",
                field.key,
                field.display_name,
                format_note(&field.kind)
            ));
        }

        let mut collected: Vec<_> = existing
            .iter()
            .filter(|(k, _)| self.schema.field(k).is_some())
            .collect();
        if !collected.is_empty() {
            collected.sort_by(|a, b| a.0.cmp(b.0));
            out.push_str("\nJá coletados (só inclua se a mensagem corrigir o valor):\n");
            for (key, value) in collected {
                out.push_str(&format!("- {}: {}\n", key, value));
            }
        }

        out
    }
}

fn format_note(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Text { .. } => String::new(),
        FieldKind::Digits { min_len, max_len } if min_len == max_len => {
            format!(" ({} dígitos, só números)", min_len)
        }
        FieldKind::Digits { .. } => " (só números)".to_string(),
        FieldKind::Date { .. } => " (DD/MM/AAAA)".to_string(),
        FieldKind::Enumerated { values, .. } => format!(" (um de: {})", values.join(", ")),
        FieldKind::Money => " (valor em reais, ex: 50000.00)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_keys_and_formats() {
        let schema = FieldSchema::builtin().unwrap();
        let messages = ExtractionPrompt::new(&schema).build("meu cpf é 123", &FieldValues::new());

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("- cpf_solicitante: CPF (11 dígitos, só números)"));
        assert!(messages[0].content.contains("- data_nascimento: Data de Nascimento (DD/MM/AAAA)"));
        assert!(messages[0].content.contains("NUNCA invente"));
        assert!(!messages[0].content.contains("Já coletados"));
        assert_eq!(messages[1].content, "meu cpf é 123");
    }

    #[test]
    fn test_prompt_includes_collected_values() {
        let schema = FieldSchema::builtin().unwrap();
        let mut existing = FieldValues::new();
        existing.insert("uf".into(), "SP".into());
        existing.insert("unrelated".into(), "x".into());

        let messages = ExtractionPrompt::new(&schema).build("oi", &existing);
        assert!(messages[0].content.contains("- uf: SP"));
        assert!(!messages[0].content.contains("unrelated"));
    }
}
