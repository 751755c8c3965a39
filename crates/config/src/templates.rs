//! Outbound message catalog
//!
//! Every text the assistant sends lives here. Templates use `{name}`
//! placeholders filled by [`render`]. Defaults are Brazilian Portuguese and
//! any entry can be overridden from the `templates` settings section.

use serde::{Deserialize, Serialize};

/// Replace `{name}` placeholders. Unknown placeholders are left as-is.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in values {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageCatalog {
    pub welcome: String,
    /// Appended after a re-sent menu; `{options}` lists the valid codes
    pub option_hint: String,
    pub company_info: String,
    pub company_text: String,
    /// `{required}` lists every field by section
    pub collect_start: String,
    /// `{collected}` and `{missing}`
    pub collecting: String,
    /// `{summary}`
    pub validating: String,
    pub correction_prompt: String,
    pub processing: String,
    /// `{reference}`
    pub completed: String,
    /// Caption of the proposal document; `{reference}`
    pub document_caption: String,
    pub quote_failed: String,
    pub post_completion: String,
    pub awaiting_agent: String,
    pub agent_connected: String,
    pub bot_back: String,
    pub closed: String,
    pub nothing_collected: String,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self {
            welcome: "🐴 *Olá! Bem-vindo à Equinos Seguros!*\n\n\
                Sou seu assistente virtual e estou aqui para ajudá-lo.\n\n\
                *Como posso te ajudar hoje?*\n\n\
                Digite o número da opção desejada:\n\n\
                *1* - Saber mais sobre a Equinos Seguros\n\
                *2* - Realizar Cotação de Seguro\n\n\
                _Você também pode digitar \"atendente\" a qualquer momento para falar com um humano._"
                .to_string(),
            option_hint: "_Por favor, digite {options}._".to_string(),
            company_info: "📋 *Sobre a Equinos Seguros*\n\n\
                {company_text}\n\n\
                *Deseja realizar uma cotação de seguro agora?*\n\n\
                Digite:\n\
                *1* - Sim, quero fazer uma cotação\n\
                *2* - Não, obrigado\n\n\
                Ou digite \"menu\" para voltar ao menu principal."
                .to_string(),
            company_text: "Somos especializados em seguros para equinos, oferecendo proteção \
                completa para seu animal.\n\n\
                *Nossos Diferenciais:*\n\
                • Cobertura personalizada\n\
                • Atendimento especializado\n\
                • Processos rápidos e transparentes\n\
                • Parceria com as melhores seguradoras"
                .to_string(),
            collect_start: "✅ *Ótimo! Vamos iniciar sua cotação de seguro.*\n\n\
                Para gerar uma cotação personalizada, preciso coletar algumas informações \
                sobre você e seu animal.\n\n\
                📋 *DADOS NECESSÁRIOS:*\n\n\
                {required}\n\n\
                Você pode enviar todas as informações de uma vez ou ir enviando aos poucos.\n\n\
                *Pode começar enviando as informações.*"
                .to_string(),
            collecting: "📝 *Obrigado pelas informações!*\n\n\
                *DADOS JÁ COLETADOS:*\n\
                {collected}\n\n\
                *AINDA PRECISO DE:*\n\
                {missing}\n\n\
                Por favor, envie as informações que ainda faltam.\n\n\
                _Digite \"atendente\" se precisar de ajuda humana._"
                .to_string(),
            validating: "✅ *Perfeito! Coletei todas as informações necessárias.*\n\n\
                *RESUMO DOS DADOS:*\n\
                {summary}\n\n\
                *Está tudo correto?*\n\n\
                Digite:\n\
                *1* - Sim, processar cotação\n\
                *2* - Não, preciso corrigir algo"
                .to_string(),
            correction_prompt: "Ok! Me diga qual informação está incorreta e qual é o valor correto."
                .to_string(),
            processing: "🔄 *Processando sua cotação...*\n\n\
                Estou enviando seus dados para o sistema da seguradora.\n\n\
                _Por favor, aguarde..._"
                .to_string(),
            completed: "✅ *Cotação #{reference} concluída com sucesso!*\n\n\
                📄 Sua proposta de seguro foi registrada.\n\n\
                *Deseja mais alguma informação?*\n\n\
                Digite:\n\
                *1* - Fazer nova cotação\n\
                *2* - Falar com atendente\n\
                *3* - Encerrar atendimento"
                .to_string(),
            document_caption: "📄 Proposta de seguro - Cotação #{reference}".to_string(),
            quote_failed: "😔 *Desculpe, não consegui concluir sua cotação agora.*\n\n\
                Seus dados continuam salvos. Envie qualquer mensagem para revisar e \
                tentar novamente, ou digite \"atendente\" para falar com um humano."
                .to_string(),
            post_completion: "🤝 *Como posso ajudar mais?*\n\n\
                Digite o número da opção desejada:\n\n\
                *1* - Fazer nova cotação\n\
                *2* - Informações sobre a empresa\n\
                *3* - Falar com atendente humano\n\
                *4* - Encerrar atendimento"
                .to_string(),
            awaiting_agent: "👤 *Transferindo para atendente humano...*\n\n\
                Um de nossos agentes irá assumir esta conversa em breve.\n\n\
                _Suas mensagens estão sendo registradas e o atendente verá todo o histórico._"
                .to_string(),
            agent_connected: "👤 *Atendente humano conectado*\n\n\
                Um de nossos agentes assumiu esta conversa e irá responder suas mensagens."
                .to_string(),
            bot_back: "🤖 *O assistente virtual está de volta!*\n\n\
                O atendimento humano foi encerrado. Vamos recomeçar."
                .to_string(),
            closed: "👋 *Obrigado por usar a Equinos Seguros!*\n\n\
                Se precisar de qualquer coisa, é só enviar uma mensagem.\n\n\
                🐴 *Até logo!*"
                .to_string(),
            nothing_collected: "Nenhum dado coletado ainda.".to_string(),
        }
    }
}

impl MessageCatalog {
    pub fn option_hint(&self, options: &str) -> String {
        render(&self.option_hint, &[("options", options)])
    }

    pub fn company_info(&self) -> String {
        render(&self.company_info, &[("company_text", &self.company_text)])
    }

    pub fn collect_start(&self, required: &str) -> String {
        render(&self.collect_start, &[("required", required)])
    }

    pub fn collecting(&self, collected: &str, missing: &str) -> String {
        let collected = if collected.is_empty() {
            self.nothing_collected.as_str()
        } else {
            collected
        };
        render(&self.collecting, &[("collected", collected), ("missing", missing)])
    }

    pub fn validating(&self, summary: &str) -> String {
        render(&self.validating, &[("summary", summary)])
    }

    pub fn completed(&self, reference: &str) -> String {
        render(&self.completed, &[("reference", reference)])
    }

    pub fn document_caption(&self, reference: &str) -> String {
        render(&self.document_caption, &[("reference", reference)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_known_placeholders() {
        let out = render("Olá {name}, ref {reference} {other}", &[("name", "Ana"), ("reference", "Q1")]);
        assert_eq!(out, "Olá Ana, ref Q1 {other}");
    }

    #[test]
    fn test_completed_includes_reference() {
        let catalog = MessageCatalog::default();
        assert!(catalog.completed("COT-42").contains("#COT-42"));
        assert!(catalog.document_caption("COT-42").ends_with("#COT-42"));
    }

    #[test]
    fn test_collecting_with_nothing_yet() {
        let catalog = MessageCatalog::default();
        let text = catalog.collecting("", "❌ CPF");
        assert!(text.contains("Nenhum dado coletado ainda."));
        assert!(text.contains("❌ CPF"));
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let catalog: MessageCatalog = serde_yaml::from_str("closed: Até mais!").unwrap();
        assert_eq!(catalog.closed, "Até mais!");
        assert_eq!(catalog.welcome, MessageCatalog::default().welcome);
    }
}
