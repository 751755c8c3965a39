//! Keyword lists for menu options and conversation commands
//!
//! Matching is done on normalized text: lowercase, accents folded,
//! whitespace collapsed, surrounding punctuation removed. So "Não!" and
//! "nao" are the same answer.

use serde::{Deserialize, Serialize};

/// Lowercase, fold Portuguese accents, collapse whitespace and trim punctuation
pub fn normalize_input(text: &str) -> String {
    let folded: String = text.chars().flat_map(char::to_lowercase).map(fold_char).collect();
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c.is_ascii_punctuation() || c == '¿' || c == '¡')
        .trim()
        .to_string()
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// A normalized keyword list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    entries: Vec<String>,
}

impl KeywordSet {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<String> = entries
            .into_iter()
            .map(|e| normalize_input(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        entries.dedup();
        Self { entries }
    }

    /// Whole-message match
    pub fn matches(&self, text: &str) -> bool {
        let text = normalize_input(text);
        self.entries.iter().any(|e| *e == text)
    }

    /// Substring match anywhere in the message
    pub fn found_in(&self, text: &str) -> bool {
        let text = normalize_input(text);
        self.entries.iter().any(|e| text.contains(e.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn with_option_code(&self, code: &str) -> Self {
        let mut entries = vec![normalize_input(code)];
        entries.extend(self.entries.iter().cloned());
        Self { entries }
    }
}

/// Synonym lists for menu answers and commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordsConfig {
    /// Main menu option 1 (company info)
    #[serde(default = "default_menu_info")]
    pub menu_info: Vec<String>,
    /// Main menu option 2 (start a quote)
    #[serde(default = "default_menu_quote")]
    pub menu_quote: Vec<String>,
    #[serde(default = "default_affirmative")]
    pub affirmative: Vec<String>,
    #[serde(default = "default_negative")]
    pub negative: Vec<String>,
    #[serde(default = "default_back_to_menu")]
    pub back_to_menu: Vec<String>,
    #[serde(default = "default_new_quote")]
    pub new_quote: Vec<String>,
    #[serde(default = "default_company_info")]
    pub company_info: Vec<String>,
    #[serde(default = "default_talk_to_operator")]
    pub talk_to_operator: Vec<String>,
    #[serde(default = "default_close")]
    pub close: Vec<String>,
    /// Explicit "new request": restart from the welcome message
    #[serde(default = "default_restart")]
    pub restart: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_menu_info() -> Vec<String> {
    strings(&["1", "um", "empresa", "saber mais"])
}

fn default_menu_quote() -> Vec<String> {
    strings(&["2", "dois", "cotacao", "cotação", "seguro"])
}

fn default_affirmative() -> Vec<String> {
    strings(&["1", "sim", "s", "correto", "ok", "isso"])
}

fn default_negative() -> Vec<String> {
    strings(&["2", "nao", "não", "n", "corrigir", "incorreto", "errado"])
}

fn default_back_to_menu() -> Vec<String> {
    strings(&["menu", "voltar", "inicio", "início"])
}

fn default_new_quote() -> Vec<String> {
    strings(&["nova cotacao", "nova cotação", "outra cotacao", "outra cotação"])
}

fn default_company_info() -> Vec<String> {
    strings(&["empresa", "informacoes", "informações"])
}

fn default_talk_to_operator() -> Vec<String> {
    strings(&["atendente"])
}

fn default_close() -> Vec<String> {
    strings(&["encerrar", "sair", "tchau", "obrigado", "obrigada"])
}

fn default_restart() -> Vec<String> {
    strings(&[
        "nova solicitacao",
        "nova solicitação",
        "recomecar",
        "recomeçar",
        "reiniciar",
        "comecar de novo",
        "começar de novo",
    ])
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            menu_info: default_menu_info(),
            menu_quote: default_menu_quote(),
            affirmative: default_affirmative(),
            negative: default_negative(),
            back_to_menu: default_back_to_menu(),
            new_quote: default_new_quote(),
            company_info: default_company_info(),
            talk_to_operator: default_talk_to_operator(),
            close: default_close(),
            restart: default_restart(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_accents_and_punctuation() {
        assert_eq!(normalize_input("  Não!  "), "nao");
        assert_eq!(normalize_input("Falar   com ALGUÉM"), "falar com alguem");
        assert_eq!(normalize_input("Cotação."), "cotacao");
    }

    #[test]
    fn test_whole_message_match() {
        let set = KeywordSet::new(default_negative());
        assert!(set.matches("NÃO"));
        assert!(set.matches("n"));
        assert!(!set.matches("não sei"));
    }

    #[test]
    fn test_substring_match() {
        let set = KeywordSet::new(["falar com alguém", "atendente"]);
        assert!(set.found_in("Quero FALAR com alguem agora"));
        assert!(set.found_in("cadê o atendente?"));
        assert!(!set.found_in("meu cavalo se chama Trovão"));
    }

    #[test]
    fn test_option_code_prefix() {
        let set = KeywordSet::new(default_close()).with_option_code("3");
        assert!(set.matches("3"));
        assert!(set.matches("Encerrar"));
        assert!(!set.matches("2"));
    }
}
