//! Handoff between the automated flow and a human operator

use chrono::{DateTime, Utc};
use std::time::Duration;

use quote_intake_config::KeywordSet;
use quote_intake_core::{ConversationState, Error, Result, Session};

use crate::to_chrono;

/// Keyword- and timeout-driven handoff rules
///
/// Holds only its configuration; all state lives in the session.
#[derive(Debug, Clone)]
pub struct HandoffCoordinator {
    keywords: KeywordSet,
    agent_timeout: chrono::Duration,
}

impl HandoffCoordinator {
    pub fn new<S: AsRef<str>>(keywords: &[S], agent_timeout: Duration) -> Self {
        Self {
            keywords: KeywordSet::new(keywords),
            agent_timeout: to_chrono(agent_timeout),
        }
    }

    /// Case-insensitive substring match against the handoff keywords
    pub fn is_handoff_trigger(&self, text: &str) -> bool {
        self.keywords.found_in(text)
    }

    /// An operator-owned session idle past the agent timeout goes back to the bot
    pub fn should_auto_release(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.state == ConversationState::AgentActive && session.elapsed(now) > self.agent_timeout
    }

    /// Queue the session for an operator. Collected fields stay.
    pub fn request_operator(&self, session: &mut Session) {
        session.state = ConversationState::AwaitingAgent;
        session.correction_pending = false;
    }

    /// Give the session to `agent_id`
    pub fn assign(&self, session: &mut Session, agent_id: &str) -> Result<()> {
        if agent_id.trim().is_empty() {
            return Err(Error::InvalidOperation("agent id is empty".to_string()));
        }
        if session.state.is_terminal() {
            return Err(Error::InvalidOperation(format!(
                "conversation {} is closed",
                session.contact_id
            )));
        }
        session.state = ConversationState::AgentActive;
        session.assigned_agent_id = Some(agent_id.to_string());
        Ok(())
    }

    /// Hand the session back to the bot, starting over. History is kept.
    pub fn release(&self, session: &mut Session) {
        session.reset();
    }
}
