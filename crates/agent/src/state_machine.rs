//! Conversation state machine
//!
//! One entry point, [`StateMachine::transition`], applies an inbound message
//! to a session in this order:
//!
//! 1. lifecycle: conversation timeout reset or operator auto-release
//! 2. handoff keywords (any state except `AgentActive`)
//! 3. restart keywords (bot-owned states)
//! 4. field extraction and merge while collecting
//! 5. the handler registered for the current state
//!
//! Handlers are plain functions of `(session, input)` returning the next
//! state, the outbound texts and at most one side effect on the session.
//! `Processing` is left by [`StateMachine::finish_processing`] once the
//! engine has called the quote generator.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use quote_intake_config::{FieldSchema, KeywordSet, KeywordsConfig, MessageCatalog, Settings};
use quote_intake_core::{
    ConversationState, FieldValues, QuoteCompleted, QuoteOutcome, Session, TranscriptRole,
};

use crate::extractor::Extractor;
use crate::handoff::HandoffCoordinator;
use crate::merge::{merge_candidates, MergeReport};
use crate::summary::FormRenderer;
use crate::to_chrono;

const MENU_OPTIONS: &str = "1 ou 2";
const POST_COMPLETION_OPTIONS: &str = "1, 2, 3 ou 4";

/// Why a session was started over during a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// Idle past the conversation timeout
    ConversationTimeout,
    /// Operator idle past the agent timeout
    AgentTimeout,
    /// Contact asked for a new request
    Restart,
    /// Message after the conversation was closed
    Reopened,
}

impl ResetReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetReason::ConversationTimeout => "conversation_timeout",
            ResetReason::AgentTimeout => "agent_timeout",
            ResetReason::Restart => "restart",
            ResetReason::Reopened => "reopened",
        }
    }
}

/// Result of applying one inbound message
#[derive(Debug, Clone)]
pub struct Transition {
    /// State stored when the message arrived
    pub started_from: ConversationState,
    /// State the message was dispatched from, after any reset
    pub from: ConversationState,
    pub to: ConversationState,
    pub outbound: Vec<String>,
    pub reset: Option<ResetReason>,
    /// Set when this turn handed the session to an operator ("keyword" or "menu")
    pub handoff: Option<&'static str>,
    pub merge: Option<MergeReport>,
}

impl Transition {
    /// The quote generator must run exactly once for this turn
    pub fn entered_processing(&self) -> bool {
        self.to == ConversationState::Processing && self.from != ConversationState::Processing
    }
}

#[derive(Debug, Clone)]
struct Keywords {
    menu_info: KeywordSet,
    menu_quote: KeywordSet,
    affirmative: KeywordSet,
    negative: KeywordSet,
    back_to_menu: KeywordSet,
    restart: KeywordSet,
    // COMPLETED menu: 1 new quote, 2 operator, 3 close
    completed_new: KeywordSet,
    completed_operator: KeywordSet,
    completed_close: KeywordSet,
    // POST_COMPLETION menu: 1 new quote, 2 company info, 3 operator, 4 close
    post_new: KeywordSet,
    post_info: KeywordSet,
    post_operator: KeywordSet,
    post_close: KeywordSet,
}

impl Keywords {
    fn compile(config: &KeywordsConfig) -> Self {
        let new_quote = KeywordSet::new(&config.new_quote);
        let operator = KeywordSet::new(&config.talk_to_operator);
        let close = KeywordSet::new(&config.close);

        Self {
            menu_info: KeywordSet::new(&config.menu_info),
            menu_quote: KeywordSet::new(&config.menu_quote),
            affirmative: KeywordSet::new(&config.affirmative),
            negative: KeywordSet::new(&config.negative),
            back_to_menu: KeywordSet::new(&config.back_to_menu),
            restart: KeywordSet::new(&config.restart),
            completed_new: new_quote.with_option_code("1"),
            completed_operator: operator.with_option_code("2"),
            completed_close: close.with_option_code("3"),
            post_new: new_quote.with_option_code("1"),
            post_info: KeywordSet::new(&config.company_info).with_option_code("2"),
            post_operator: operator.with_option_code("3"),
            post_close: close.with_option_code("4"),
        }
    }
}

/// Session mutation requested by a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    ClearFields,
    BeginCorrection,
    EndCorrection,
    Reset(ResetReason),
}

struct TurnInput<'a> {
    text: &'a str,
}

struct Step {
    next: ConversationState,
    outbound: Vec<String>,
    effect: Option<Effect>,
    handoff: Option<&'static str>,
}

impl Step {
    fn to(next: ConversationState, text: String) -> Self {
        Self {
            next,
            outbound: vec![text],
            effect: None,
            handoff: None,
        }
    }

    fn silent(next: ConversationState) -> Self {
        Self {
            next,
            outbound: Vec::new(),
            effect: None,
            handoff: None,
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }

    fn handoff(mut self) -> Self {
        self.handoff = Some("menu");
        self
    }
}

type Handler = fn(&StateMachine, &Session, &TurnInput<'_>) -> Step;

fn handler_for(state: ConversationState) -> Handler {
    use ConversationState::*;
    match state {
        Initial => on_initial,
        Menu => on_menu,
        Info => on_info,
        CollectStart | Collecting => on_collecting,
        Validating => on_validating,
        Processing => on_stale_processing,
        Completed => on_completed,
        PostCompletion => on_post_completion,
        AwaitingAgent | AgentActive => on_operator_owned,
        Closed => on_closed,
    }
}

/// Transition function shared by all sessions. Holds configuration only.
pub struct StateMachine {
    schema: Arc<FieldSchema>,
    catalog: MessageCatalog,
    keywords: Keywords,
    handoff: HandoffCoordinator,
    renderer: FormRenderer,
    conversation_timeout: chrono::Duration,
    transcript_cap: usize,
}

impl StateMachine {
    pub fn new(
        schema: Arc<FieldSchema>,
        catalog: MessageCatalog,
        keywords: &KeywordsConfig,
        handoff: HandoffCoordinator,
        conversation_timeout: Duration,
    ) -> Self {
        Self {
            renderer: FormRenderer::new(schema.clone()),
            schema,
            catalog,
            keywords: Keywords::compile(keywords),
            handoff,
            conversation_timeout: to_chrono(conversation_timeout),
            transcript_cap: 200,
        }
    }

    pub fn from_settings(schema: Arc<FieldSchema>, settings: &Settings) -> Self {
        let handoff = HandoffCoordinator::new(
            &settings.handoff.keywords,
            settings.conversation.agent_timeout(),
        );
        Self::new(
            schema,
            settings.templates.clone(),
            &settings.keywords,
            handoff,
            settings.conversation.timeout(),
        )
        .with_transcript_cap(settings.conversation.max_transcript_len)
    }

    pub fn with_transcript_cap(mut self, cap: usize) -> Self {
        self.transcript_cap = cap;
        self
    }

    pub fn schema(&self) -> &Arc<FieldSchema> {
        &self.schema
    }

    pub fn catalog(&self) -> &MessageCatalog {
        &self.catalog
    }

    pub fn handoff(&self) -> &HandoffCoordinator {
        &self.handoff
    }

    pub fn renderer(&self) -> &FormRenderer {
        &self.renderer
    }

    /// Append bot or operator lines to the session transcript
    pub fn record(&self, session: &mut Session, role: TranscriptRole, texts: &[String], at: DateTime<Utc>) {
        for text in texts {
            session.record_transcript(role, text, at, self.transcript_cap);
        }
    }

    /// Apply one inbound message to `session`
    pub async fn transition(
        &self,
        session: &mut Session,
        text: &str,
        now: DateTime<Utc>,
        extractor: &dyn Extractor,
    ) -> Transition {
        let started_from = session.state;
        let mut outbound = Vec::new();
        let mut reset = None;

        session.message_count += 1;
        session.record_transcript(TranscriptRole::Contact, text, now, self.transcript_cap);

        if session.state != ConversationState::AgentActive
            && session.elapsed(now) > self.conversation_timeout
        {
            session.reset();
            reset = Some(ResetReason::ConversationTimeout);
        } else if self.handoff.should_auto_release(session, now) {
            self.handoff.release(session);
            outbound.push(self.catalog.bot_back.clone());
            reset = Some(ResetReason::AgentTimeout);
        }
        session.touch(now);

        let from = session.state;

        if from != ConversationState::AgentActive && self.handoff.is_handoff_trigger(text) {
            let requested = from != ConversationState::AwaitingAgent;
            if requested {
                self.handoff.request_operator(session);
                outbound.push(self.catalog.awaiting_agent.clone());
            }
            let handoff = requested.then_some("keyword");
            return self.finish(session, now, started_from, from, outbound, reset, handoff, None);
        }

        let from = if !from.is_operator_owned() && self.keywords.restart.found_in(text) {
            session.reset();
            reset = Some(ResetReason::Restart);
            session.state
        } else {
            from
        };

        let merge = if from.is_collecting() {
            Some(self.extract_and_merge(session, text, extractor).await)
        } else {
            None
        };

        let step = handler_for(from)(self, session, &TurnInput { text });
        match step.effect {
            Some(Effect::ClearFields) => session.clear_fields(),
            Some(Effect::BeginCorrection) => session.correction_pending = true,
            Some(Effect::EndCorrection) => session.correction_pending = false,
            Some(Effect::Reset(reason)) => {
                session.reset();
                reset = Some(reason);
            }
            None => {}
        }
        if step.handoff.is_some() {
            self.handoff.request_operator(session);
        }
        session.state = step.next;
        outbound.extend(step.outbound);

        self.finish(session, now, started_from, from, outbound, reset, step.handoff, merge)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        session: &mut Session,
        now: DateTime<Utc>,
        started_from: ConversationState,
        from: ConversationState,
        outbound: Vec<String>,
        reset: Option<ResetReason>,
        handoff: Option<&'static str>,
        merge: Option<MergeReport>,
    ) -> Transition {
        self.record(session, TranscriptRole::Bot, &outbound, now);
        Transition {
            started_from,
            from,
            to: session.state,
            outbound,
            reset,
            handoff,
            merge,
        }
    }

    async fn extract_and_merge(
        &self,
        session: &mut Session,
        text: &str,
        extractor: &dyn Extractor,
    ) -> MergeReport {
        // a correction re-reads every field, not only the missing ones
        let correcting = session.correction_pending;
        let empty = FieldValues::new();
        let existing = if correcting { &empty } else { &session.fields };

        let candidates = extractor.extract(text, existing).await;
        let report = merge_candidates(&self.schema, &mut session.fields, candidates, correcting);

        tracing::debug!(
            contact_id = %session.contact_id,
            extractor = extractor.name(),
            accepted = ?report.accepted,
            rejected = report.rejected.len(),
            correcting,
            "Merged extracted fields"
        );
        report
    }

    /// Leave `Processing` with the quote generator's answer
    ///
    /// On success the submission is appended to history and the completion
    /// event returned. On failure the fields stay and the contact is sent
    /// back to collecting with an apology; the raw error is only logged.
    pub fn finish_processing(
        &self,
        session: &mut Session,
        outcome: QuoteOutcome,
        now: DateTime<Utc>,
    ) -> (Vec<String>, Option<QuoteCompleted>) {
        if session.state != ConversationState::Processing {
            tracing::warn!(
                contact_id = %session.contact_id,
                state = %session.state,
                "Quote outcome for a session no longer processing, ignoring"
            );
            return (Vec::new(), None);
        }

        let (outbound, event) = if outcome.success {
            let reference = outcome
                .reference
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(generate_reference);
            let event = QuoteCompleted {
                contact_id: session.contact_id.clone(),
                reference,
                fields: session.fields.clone(),
                artifact_ref: outcome.artifact_ref.filter(|a| !a.trim().is_empty()),
                completed_at: now,
            };
            session.append_history(event.record());
            session.state = ConversationState::Completed;
            (vec![self.catalog.completed(&event.reference)], Some(event))
        } else {
            tracing::warn!(
                contact_id = %session.contact_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Quote generation failed"
            );
            session.state = ConversationState::Collecting;
            (vec![self.catalog.quote_failed.clone()], None)
        };

        self.record(session, TranscriptRole::Bot, &outbound, now);
        (outbound, event)
    }

    fn menu_with_hint(&self) -> String {
        format!("{}\n\n{}", self.catalog.welcome, self.catalog.option_hint(MENU_OPTIONS))
    }

    fn collect_start(&self) -> Step {
        Step::to(
            ConversationState::CollectStart,
            self.catalog.collect_start(&self.renderer.required_list()),
        )
        .with_effect(Effect::ClearFields)
    }

    fn summary(&self, fields: &FieldValues) -> String {
        self.catalog.validating(&self.renderer.summary(fields))
    }
}

fn generate_reference() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("COT-{}", id[..8].to_uppercase())
}

fn on_initial(m: &StateMachine, _session: &Session, _input: &TurnInput<'_>) -> Step {
    Step::to(ConversationState::Menu, m.catalog.welcome.clone())
}

fn on_menu(m: &StateMachine, _session: &Session, input: &TurnInput<'_>) -> Step {
    if m.keywords.menu_info.matches(input.text) {
        Step::to(ConversationState::Info, m.catalog.company_info())
    } else if m.keywords.menu_quote.matches(input.text) {
        m.collect_start()
    } else {
        Step::to(ConversationState::Menu, m.menu_with_hint())
    }
}

fn on_info(m: &StateMachine, _session: &Session, input: &TurnInput<'_>) -> Step {
    let kw = &m.keywords;
    if kw.affirmative.matches(input.text) {
        m.collect_start()
    } else if kw.negative.matches(input.text) {
        Step::to(ConversationState::Closed, m.catalog.closed.clone())
    } else if kw.back_to_menu.matches(input.text) {
        Step::to(ConversationState::Menu, m.catalog.welcome.clone())
    } else {
        Step::to(
            ConversationState::Info,
            format!("{}\n\n{}", m.catalog.company_info(), m.catalog.option_hint(MENU_OPTIONS)),
        )
    }
}

fn on_collecting(m: &StateMachine, session: &Session, _input: &TurnInput<'_>) -> Step {
    if m.schema.is_complete(&session.fields) {
        Step::to(ConversationState::Validating, m.summary(&session.fields))
            .with_effect(Effect::EndCorrection)
    } else {
        Step::to(
            ConversationState::Collecting,
            m.catalog.collecting(
                &m.renderer.collected(&session.fields),
                &m.renderer.missing(&session.fields),
            ),
        )
    }
}

fn on_validating(m: &StateMachine, session: &Session, input: &TurnInput<'_>) -> Step {
    if m.keywords.affirmative.matches(input.text) {
        Step::to(ConversationState::Processing, m.catalog.processing.clone())
    } else if m.keywords.negative.matches(input.text) {
        Step::to(ConversationState::Collecting, m.catalog.correction_prompt.clone())
            .with_effect(Effect::BeginCorrection)
    } else {
        Step::to(
            ConversationState::Validating,
            format!("{}\n\n{}", m.summary(&session.fields), m.catalog.option_hint(MENU_OPTIONS)),
        )
    }
}

// The previous turn entered PROCESSING but never finished it.
fn on_stale_processing(m: &StateMachine, session: &Session, _input: &TurnInput<'_>) -> Step {
    tracing::warn!(contact_id = %session.contact_id, "Stale processing state, asking to confirm again");
    Step::to(ConversationState::Validating, m.summary(&session.fields))
}

fn on_completed(m: &StateMachine, _session: &Session, input: &TurnInput<'_>) -> Step {
    let kw = &m.keywords;
    if kw.completed_new.matches(input.text) {
        m.collect_start()
    } else if kw.completed_operator.matches(input.text) {
        Step::to(ConversationState::AwaitingAgent, m.catalog.awaiting_agent.clone()).handoff()
    } else if kw.completed_close.matches(input.text) {
        Step::to(ConversationState::Closed, m.catalog.closed.clone())
    } else {
        Step::to(ConversationState::PostCompletion, m.catalog.post_completion.clone())
    }
}

fn on_post_completion(m: &StateMachine, _session: &Session, input: &TurnInput<'_>) -> Step {
    let kw = &m.keywords;
    if kw.post_new.matches(input.text) {
        m.collect_start()
    } else if kw.post_info.matches(input.text) {
        Step::to(ConversationState::Info, m.catalog.company_info())
    } else if kw.post_operator.matches(input.text) {
        Step::to(ConversationState::AwaitingAgent, m.catalog.awaiting_agent.clone()).handoff()
    } else if kw.post_close.matches(input.text) {
        Step::to(ConversationState::Closed, m.catalog.closed.clone())
    } else {
        Step::to(
            ConversationState::PostCompletion,
            format!(
                "{}\n\n{}",
                m.catalog.post_completion,
                m.catalog.option_hint(POST_COMPLETION_OPTIONS)
            ),
        )
    }
}

// Recorded in the transcript for the operator, no automated reply.
fn on_operator_owned(_m: &StateMachine, session: &Session, _input: &TurnInput<'_>) -> Step {
    Step::silent(session.state)
}

fn on_closed(m: &StateMachine, _session: &Session, _input: &TurnInput<'_>) -> Step {
    Step::to(ConversationState::Menu, m.catalog.welcome.clone())
        .with_effect(Effect::Reset(ResetReason::Reopened))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PatternExtractor;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn machine() -> (StateMachine, PatternExtractor) {
        let schema = FieldSchema::builtin().unwrap();
        let handoff = HandoffCoordinator::new(&["atendente", "humano"], Duration::from_secs(86_400));
        let machine = StateMachine::new(
            schema.clone(),
            MessageCatalog::default(),
            &KeywordsConfig::default(),
            handoff,
            Duration::from_secs(600),
        );
        (machine, PatternExtractor::new(schema))
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
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[tokio::test]
    async fn test_first_message_opens_menu() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());

        let t = machine.transition(&mut session, "oi", t0(), &extractor).await;
        assert_eq!(t.from, ConversationState::Initial);
        assert_eq!(t.to, ConversationState::Menu);
        assert_eq!(t.outbound, vec![MessageCatalog::default().welcome]);
        assert_eq!(session.message_count, 1);
        assert_eq!(session.transcript.len(), 2);
    }

    #[tokio::test]
    async fn test_unrecognized_menu_option_keeps_state() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Menu;

        let t = machine.transition(&mut session, "talvez", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::Menu);
        assert!(t.outbound[0].ends_with("_Por favor, digite 1 ou 2._"));
    }

    #[tokio::test]
    async fn test_menu_quote_clears_previous_fields() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Menu;
        session.fields = complete_fields();

        let t = machine.transition(&mut session, "2", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::CollectStart);
        assert!(session.fields.is_empty());
        assert!(t.outbound[0].contains("• CPF"));
    }

    #[tokio::test]
    async fn test_info_answers() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());

        session.state = ConversationState::Info;
        let t = machine.transition(&mut session, "Não", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::Closed);

        session.state = ConversationState::Info;
        let t = machine.transition(&mut session, "menu", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::Menu);

        session.state = ConversationState::Info;
        let t = machine.transition(&mut session, "sim", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::CollectStart);
    }

    #[tokio::test]
    async fn test_timeout_resets_before_dispatch() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Collecting;
        session.fields.insert("uf".into(), "SP".into());

        let later = t0() + chrono::Duration::minutes(11);
        let t = machine.transition(&mut session, "oi", later, &extractor).await;
        assert_eq!(t.started_from, ConversationState::Collecting);
        assert_eq!(t.from, ConversationState::Initial);
        assert_eq!(t.reset, Some(ResetReason::ConversationTimeout));
        assert_eq!(t.to, ConversationState::Menu);
        assert!(session.fields.is_empty());
        assert_eq!(session.last_interaction_at(), later);
    }

    #[tokio::test]
    async fn test_agent_active_is_silent_and_ignores_conversation_timeout() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::AgentActive;
        session.assigned_agent_id = Some("ana".into());

        let later = t0() + chrono::Duration::hours(2);
        let t = machine.transition(&mut session, "atendente?", later, &extractor).await;
        assert!(t.outbound.is_empty());
        assert_eq!(t.to, ConversationState::AgentActive);
        assert_eq!(t.reset, None);
        assert_eq!(t.handoff, None);
    }

    #[tokio::test]
    async fn test_auto_release_greets_again() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::AgentActive;
        session.assigned_agent_id = Some("ana".into());

        let later = t0() + chrono::Duration::hours(25);
        let t = machine.transition(&mut session, "olá?", later, &extractor).await;
        let catalog = MessageCatalog::default();
        assert_eq!(t.reset, Some(ResetReason::AgentTimeout));
        assert_eq!(t.from, ConversationState::Initial);
        assert_eq!(t.outbound, vec![catalog.bot_back, catalog.welcome]);
        assert!(session.assigned_agent_id.is_none());
    }

    #[tokio::test]
    async fn test_handoff_keyword_overrides_collection() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Collecting;
        session.fields.insert("uf".into(), "SP".into());

        let t = machine.transition(&mut session, "quero um ATENDENTE, CEP 13010-000", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::AwaitingAgent);
        assert_eq!(t.handoff, Some("keyword"));
        assert_eq!(session.fields.len(), 1);

        // already waiting: no duplicate notice
        let t = machine.transition(&mut session, "atendente!!", t0(), &extractor).await;
        assert!(t.outbound.is_empty());
        assert_eq!(t.handoff, None);
        assert_eq!(t.to, ConversationState::AwaitingAgent);
    }

    #[tokio::test]
    async fn test_restart_keyword_starts_over() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Validating;
        session.fields = complete_fields();

        let t = machine.transition(&mut session, "quero uma nova solicitação", t0(), &extractor).await;
        assert_eq!(t.reset, Some(ResetReason::Restart));
        assert_eq!(t.to, ConversationState::Menu);
        assert!(session.fields.is_empty());
    }

    #[tokio::test]
    async fn test_last_field_advances_to_validating() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Collecting;
        session.fields = complete_fields();
        session.fields.remove("cep");

        let t = machine.transition(&mut session, "CEP 13010-000", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::Validating);
        assert!(t.outbound[0].contains("RESUMO DOS DADOS"));
        assert!(t.outbound[0].contains("• CEP: 13010000"));
    }

    #[tokio::test]
    async fn test_correction_overwrites_and_returns_to_summary() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Validating;
        session.fields = complete_fields();

        let t = machine.transition(&mut session, "2", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::Collecting);
        assert!(session.correction_pending);

        let t = machine.transition(&mut session, "CEP: 04567-000", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::Validating);
        assert_eq!(session.fields["cep"], "04567000");
        assert!(!session.correction_pending);
    }

    #[tokio::test]
    async fn test_confirmation_enters_processing_once() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Validating;
        session.fields = complete_fields();

        let t = machine.transition(&mut session, "1", t0(), &extractor).await;
        assert!(t.entered_processing());

        // stale processing on the next message goes back to the summary
        let t = machine.transition(&mut session, "e aí?", t0(), &extractor).await;
        assert!(!t.entered_processing());
        assert_eq!(t.to, ConversationState::Validating);
    }

    #[test]
    fn test_finish_processing_success_and_failure() {
        let (machine, _) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Processing;
        session.fields = complete_fields();

        let (outbound, event) =
            machine.finish_processing(&mut session, QuoteOutcome::succeeded("Q-77"), t0());
        assert_eq!(session.state, ConversationState::Completed);
        assert!(outbound[0].contains("#Q-77"));
        assert_eq!(event.unwrap().reference, "Q-77");
        assert_eq!(session.history().len(), 1);
        assert!(session.history()[0].artifact_ref.is_none());

        session.state = ConversationState::Processing;
        let (outbound, event) =
            machine.finish_processing(&mut session, QuoteOutcome::failed("portal down"), t0());
        assert!(event.is_none());
        assert_eq!(session.state, ConversationState::Collecting);
        assert!(!outbound[0].contains("portal down"));
        assert_eq!(session.fields.len(), 14);
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn test_document_location_is_not_used_as_reference() {
        let (machine, _) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Processing;
        session.fields = complete_fields();

        let outcome = QuoteOutcome {
            success: true,
            ..Default::default()
        }
        .with_artifact("https://files.example/proposta.pdf");
        let (outbound, event) = machine.finish_processing(&mut session, outcome, t0());

        let event = event.unwrap();
        assert!(event.reference.starts_with("COT-"));
        assert_eq!(event.artifact_ref.as_deref(), Some("https://files.example/proposta.pdf"));
        assert!(!outbound[0].contains("files.example"));
        assert_eq!(
            session.history()[0].artifact_ref.as_deref(),
            Some("https://files.example/proposta.pdf")
        );
    }

    #[test]
    fn test_generated_reference_shape() {
        let reference = generate_reference();
        assert!(reference.starts_with("COT-"));
        assert_eq!(reference.len(), 12);
    }

    #[tokio::test]
    async fn test_post_completion_menu() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Completed;

        let t = machine.transition(&mut session, "hmm", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::PostCompletion);

        let t = machine.transition(&mut session, "3", t0(), &extractor).await;
        assert_eq!(t.to, ConversationState::AwaitingAgent);
        assert_eq!(t.handoff, Some("menu"));
    }

    #[tokio::test]
    async fn test_closed_conversation_reopens() {
        let (machine, extractor) = machine();
        let mut session = Session::new("c", t0());
        session.state = ConversationState::Closed;

        let t = machine.transition(&mut session, "oi de novo", t0(), &extractor).await;
        assert_eq!(t.reset, Some(ResetReason::Reopened));
        assert_eq!(t.to, ConversationState::Menu);
    }
}
