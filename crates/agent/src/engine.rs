//! Conversation engine
//!
//! `ConversationEngine::handle_message` is the single entry point per
//! inbound message. A turn holds the contact's session lock from the state
//! transition until the commit, including the quote generator call when the
//! turn enters `Processing`, so messages for one contact apply in order.
//! Outbound delivery (texts, then the proposal document when the quoting
//! service produced one) happens after the commit and never rolls it back.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use quote_intake_core::{
    Clock, ConversationState, Error, FieldValues, MessageSender, OutboundDocument, QuoteCompleted,
    QuoteGenerator, QuoteOutcome, Result, Session, SystemClock, TranscriptRole,
};

use crate::extractor::Extractor;
use crate::session_store::SessionStore;
use crate::state_machine::{ResetReason, StateMachine, Transition};

const DEFAULT_QUOTE_TIMEOUT: Duration = Duration::from_secs(120);

/// What one turn did, after commit
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub contact_id: String,
    /// State stored before the turn
    pub started_from: ConversationState,
    /// State committed by the turn
    pub state: ConversationState,
    pub outbound: Vec<String>,
    /// Sent after `outbound`
    pub document: Option<OutboundDocument>,
    pub completion: Option<QuoteCompleted>,
    pub reset: Option<ResetReason>,
}

pub struct ConversationEngine {
    machine: Arc<StateMachine>,
    store: Arc<dyn SessionStore>,
    extractor: Arc<dyn Extractor>,
    quotes: Arc<dyn QuoteGenerator>,
    sender: Option<Arc<dyn MessageSender>>,
    clock: Arc<dyn Clock>,
    quote_timeout: Duration,
    events: broadcast::Sender<QuoteCompleted>,
}

impl ConversationEngine {
    pub fn new(
        machine: StateMachine,
        store: Arc<dyn SessionStore>,
        extractor: Arc<dyn Extractor>,
        quotes: Arc<dyn QuoteGenerator>,
    ) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            machine: Arc::new(machine),
            store,
            extractor,
            quotes,
            sender: None,
            clock: Arc::new(SystemClock),
            quote_timeout: DEFAULT_QUOTE_TIMEOUT,
            events,
        }
    }

    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_quote_timeout(mut self, timeout: Duration) -> Self {
        self.quote_timeout = timeout;
        self
    }

    /// Completion events, one per successful quote
    pub fn subscribe(&self) -> broadcast::Receiver<QuoteCompleted> {
        self.events.subscribe()
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// Apply one inbound message at the clock's current time
    pub async fn handle_message(&self, contact_id: &str, text: &str) -> Result<TurnOutcome> {
        let now = self.clock.now();
        self.handle_message_at(contact_id, text, now).await
    }

    /// Apply one inbound message at `now`
    ///
    /// Only store failures (`SessionStoreUnavailable`, `InvalidOperation`
    /// for an empty contact id) are returned; extraction and quote
    /// failures are handled inside the turn.
    pub async fn handle_message_at(
        &self,
        contact_id: &str,
        text: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<TurnOutcome> {
        let started = Instant::now();

        let mut session = self.store.lock(contact_id, now).await?;
        let transition = self
            .machine
            .transition(&mut session, text, now, self.extractor.as_ref())
            .await;

        let mut outbound = transition.outbound.clone();
        let mut completion = None;
        if transition.entered_processing() {
            let outcome = self.generate_quote(contact_id, &session.fields).await;
            let (texts, event) = self.machine.finish_processing(&mut session, outcome, now);
            outbound.extend(texts);
            completion = event;
        }

        let state = session.state;
        drop(session);

        self.record_turn(contact_id, &transition, state, started);
        if let Some(event) = &completion {
            tracing::info!(
                contact_id = %contact_id,
                reference = %event.reference,
                "Quote completed"
            );
            // no subscribers is fine
            let _ = self.events.send(event.clone());
        }

        let document = completion.as_ref().and_then(|event| self.proposal_document(event));

        self.deliver(contact_id, &outbound).await;
        if let Some(document) = &document {
            self.deliver_document(contact_id, document).await;
        }

        Ok(TurnOutcome {
            contact_id: contact_id.to_string(),
            started_from: transition.started_from,
            state,
            outbound,
            document,
            completion,
            reset: transition.reset,
        })
    }

    async fn generate_quote(&self, contact_id: &str, fields: &FieldValues) -> QuoteOutcome {
        match tokio::time::timeout(self.quote_timeout, self.quotes.generate(fields)).await {
            Ok(outcome) => {
                let label = if outcome.success { "success" } else { "failure" };
                metrics::counter!("intake_quotes_total", "outcome" => label).increment(1);
                outcome
            }
            Err(_) => {
                tracing::warn!(
                    contact_id = %contact_id,
                    timeout_secs = self.quote_timeout.as_secs(),
                    "Quote generation timed out"
                );
                metrics::counter!("intake_quotes_total", "outcome" => "timeout").increment(1);
                QuoteOutcome::failed(format!(
                    "timed out after {}s",
                    self.quote_timeout.as_secs()
                ))
            }
        }
    }

    fn record_turn(
        &self,
        contact_id: &str,
        transition: &Transition,
        state: ConversationState,
        started: Instant,
    ) {
        let reason = transition
            .reset
            .map(|r| r.as_str())
            .or(transition.handoff.map(|_| "handoff"))
            .unwrap_or("message");

        tracing::info!(
            contact_id = %contact_id,
            from = %transition.started_from,
            to = %state,
            reason,
            "Conversation turn"
        );

        metrics::counter!("intake_messages_total", "state" => transition.started_from.as_str())
            .increment(1);
        if transition.started_from != state {
            metrics::counter!(
                "intake_transitions_total",
                "from" => transition.started_from.as_str(),
                "to" => state.as_str()
            )
            .increment(1);
        }
        if let Some(trigger) = transition.handoff {
            metrics::counter!("intake_handoffs_total", "trigger" => trigger).increment(1);
        }
        metrics::histogram!("intake_turn_duration_seconds").record(started.elapsed().as_secs_f64());
    }

    async fn deliver(&self, contact_id: &str, texts: &[String]) {
        let Some(sender) = &self.sender else {
            return;
        };
        for text in texts {
            if !sender.send(contact_id, text).await {
                tracing::warn!(contact_id = %contact_id, "Outbound message not delivered");
                metrics::counter!("intake_send_failures_total", "kind" => "text").increment(1);
            }
        }
    }

    fn proposal_document(&self, event: &QuoteCompleted) -> Option<OutboundDocument> {
        let url = event.artifact_ref.clone()?;
        Some(OutboundDocument {
            url,
            filename: format!("cotacao-{}.pdf", event.reference),
            caption: self.machine.catalog().document_caption(&event.reference),
        })
    }

    async fn deliver_document(&self, contact_id: &str, document: &OutboundDocument) {
        let Some(sender) = &self.sender else {
            return;
        };
        if !sender.send_document(contact_id, document).await {
            tracing::warn!(
                contact_id = %contact_id,
                filename = %document.filename,
                "Proposal document not delivered"
            );
            metrics::counter!("intake_send_failures_total", "kind" => "document").increment(1);
        }
    }

    /// Hand the conversation to operator `agent_id`
    pub async fn assign_agent(&self, contact_id: &str, agent_id: &str) -> Result<TurnOutcome> {
        self.operator_action(contact_id, "assign", |machine, session| {
            machine.handoff().assign(session, agent_id)?;
            Ok((vec![machine.catalog().agent_connected.clone()], TranscriptRole::Bot))
        })
        .await
    }

    /// Give the conversation back to the bot, which greets again from the menu
    pub async fn release_to_bot(&self, contact_id: &str) -> Result<TurnOutcome> {
        self.operator_action(contact_id, "release", |machine, session| {
            if !session.state.is_operator_owned() {
                return Err(Error::InvalidOperation(format!(
                    "conversation {} is not with an operator ({})",
                    session.contact_id, session.state
                )));
            }
            machine.handoff().release(session);
            session.state = ConversationState::Menu;
            let catalog = machine.catalog();
            Ok((vec![catalog.bot_back.clone(), catalog.welcome.clone()], TranscriptRole::Bot))
        })
        .await
    }

    /// End the conversation. The next inbound message starts a new one.
    pub async fn close(&self, contact_id: &str) -> Result<TurnOutcome> {
        self.operator_action(contact_id, "close", |machine, session| {
            session.state = ConversationState::Closed;
            session.assigned_agent_id = None;
            session.correction_pending = false;
            Ok((vec![machine.catalog().closed.clone()], TranscriptRole::Bot))
        })
        .await
    }

    /// Relay an operator's message to the contact
    pub async fn record_agent_message(
        &self,
        contact_id: &str,
        agent_id: &str,
        text: &str,
    ) -> Result<TurnOutcome> {
        self.operator_action(contact_id, "agent_message", |_machine, session| {
            if session.state != ConversationState::AgentActive {
                return Err(Error::InvalidOperation(format!(
                    "conversation {} has no active operator",
                    session.contact_id
                )));
            }
            if session.assigned_agent_id.as_deref() != Some(agent_id) {
                return Err(Error::InvalidOperation(format!(
                    "conversation {} is assigned to another operator",
                    session.contact_id
                )));
            }
            Ok((vec![text.to_string()], TranscriptRole::Agent))
        })
        .await
    }

    async fn operator_action<F>(&self, contact_id: &str, action: &'static str, f: F) -> Result<TurnOutcome>
    where
        F: FnOnce(&StateMachine, &mut Session) -> Result<(Vec<String>, TranscriptRole)>,
    {
        let now = self.clock.now();
        let mut session = self.store.lock_existing(contact_id).await?;
        let started_from = session.state;

        let (outbound, role) = f(self.machine.as_ref(), &mut *session)?;
        session.touch(now);
        self.machine.record(&mut session, role, &outbound, now);

        let state = session.state;
        drop(session);

        tracing::info!(
            contact_id = %contact_id,
            from = %started_from,
            to = %state,
            reason = action,
            "Operator action"
        );
        if started_from != state {
            metrics::counter!(
                "intake_transitions_total",
                "from" => started_from.as_str(),
                "to" => state.as_str()
            )
            .increment(1);
        }

        self.deliver(contact_id, &outbound).await;

        Ok(TurnOutcome {
            contact_id: contact_id.to_string(),
            started_from,
            state,
            outbound,
            document: None,
            completion: None,
            reset: None,
        })
    }

    /// Snapshot of one session
    pub async fn session(&self, contact_id: &str) -> Result<Option<Session>> {
        self.store.read(contact_id).await
    }

    /// Snapshots of all sessions, most recently active first
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.store.list().await
    }
}
