//! Per-contact session record
//!
//! A `Session` tracks where a contact is in the intake conversation and the
//! fields collected so far. Sessions are owned by a session store and only
//! changed through the state machine and operator operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use unicode_segmentation::UnicodeSegmentation;

/// Collected field values keyed by schema key
pub type FieldValues = HashMap<String, String>;

/// Conversation states
///
/// Serialized as snake_case strings. Unknown strings read back from storage
/// decode to `Initial` so a corrupted record restarts the conversation
/// instead of failing the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConversationState {
    #[default]
    Initial,
    Menu,
    Info,
    CollectStart,
    Collecting,
    Validating,
    Processing,
    Completed,
    PostCompletion,
    AwaitingAgent,
    AgentActive,
    Closed,
}

impl ConversationState {
    pub const ALL: [ConversationState; 12] = [
        Self::Initial,
        Self::Menu,
        Self::Info,
        Self::CollectStart,
        Self::Collecting,
        Self::Validating,
        Self::Processing,
        Self::Completed,
        Self::PostCompletion,
        Self::AwaitingAgent,
        Self::AgentActive,
        Self::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Menu => "menu",
            Self::Info => "info",
            Self::CollectStart => "collect_start",
            Self::Collecting => "collecting",
            Self::Validating => "validating",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::PostCompletion => "post_completion",
            Self::AwaitingAgent => "awaiting_agent",
            Self::AgentActive => "agent_active",
            Self::Closed => "closed",
        }
    }

    /// Parse a stored state name. Unknown values fall back to `Initial`.
    pub fn parse_lossy(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase();
        match Self::ALL.iter().find(|s| s.as_str() == normalized) {
            Some(state) => *state,
            None => {
                tracing::warn!(value = %value, "Unknown conversation state, treating as initial");
                Self::Initial
            }
        }
    }

    /// `Closed` ends a conversation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// States in which field extraction runs on every inbound message
    pub fn is_collecting(&self) -> bool {
        matches!(self, Self::CollectStart | Self::Collecting)
    }

    /// States where a human operator owns (or is about to own) the conversation
    pub fn is_operator_owned(&self) -> bool {
        matches!(self, Self::AwaitingAgent | Self::AgentActive)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ConversationState {
    fn from(value: String) -> Self {
        Self::parse_lossy(&value)
    }
}

impl From<ConversationState> for String {
    fn from(state: ConversationState) -> Self {
        state.as_str().to_string()
    }
}

/// A completed quote submission. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub reference: String,
    pub fields: FieldValues,
    /// Generated document, when the quoting service produced one
    #[serde(default)]
    pub artifact_ref: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Emitted once per successful quote generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteCompleted {
    pub contact_id: String,
    pub reference: String,
    pub fields: FieldValues,
    #[serde(default)]
    pub artifact_ref: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl QuoteCompleted {
    pub fn record(&self) -> QuoteRecord {
        QuoteRecord {
            reference: self.reference.clone(),
            fields: self.fields.clone(),
            artifact_ref: self.artifact_ref.clone(),
            completed_at: self.completed_at,
        }
    }
}

/// Who wrote a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    Contact,
    Bot,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Longest single transcript line kept, in graphemes
const MAX_TRANSCRIPT_TEXT: usize = 2000;

/// Mutable per-contact conversation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub contact_id: String,
    pub state: ConversationState,
    #[serde(default)]
    pub fields: FieldValues,
    #[serde(default)]
    history: Vec<QuoteRecord>,
    #[serde(default)]
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    last_interaction_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
    /// Set after the contact rejects the summary; the next extraction may
    /// overwrite valid fields.
    #[serde(default)]
    pub correction_pending: bool,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
}

impl Session {
    pub fn new(contact_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            contact_id: contact_id.into(),
            state: ConversationState::Initial,
            fields: FieldValues::new(),
            history: Vec::new(),
            message_count: 0,
            created_at: now,
            last_interaction_at: now,
            assigned_agent_id: None,
            correction_pending: false,
            transcript: Vec::new(),
        }
    }

    pub fn last_interaction_at(&self) -> DateTime<Utc> {
        self.last_interaction_at
    }

    /// Time since the last interaction. Never negative.
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        let elapsed = now - self.last_interaction_at;
        if elapsed < chrono::Duration::zero() {
            chrono::Duration::zero()
        } else {
            elapsed
        }
    }

    /// Record an interaction. `last_interaction_at` never moves backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_interaction_at {
            self.last_interaction_at = now;
        }
    }

    /// Start over: clears state, fields and agent assignment. Keeps the
    /// contact id, quote history and transcript.
    pub fn reset(&mut self) {
        self.state = ConversationState::Initial;
        self.fields.clear();
        self.assigned_agent_id = None;
        self.correction_pending = false;
    }

    /// Clear collected fields for a new quote without leaving the current state
    pub fn clear_fields(&mut self) {
        self.fields.clear();
        self.correction_pending = false;
    }

    pub fn history(&self) -> &[QuoteRecord] {
        &self.history
    }

    pub fn append_history(&mut self, record: QuoteRecord) {
        self.history.push(record);
    }

    /// Append a transcript line, dropping the oldest lines past `cap`
    pub fn record_transcript(
        &mut self,
        role: TranscriptRole,
        text: &str,
        at: DateTime<Utc>,
        cap: usize,
    ) {
        let text = if text.graphemes(true).count() > MAX_TRANSCRIPT_TEXT {
            text.graphemes(true).take(MAX_TRANSCRIPT_TEXT).collect()
        } else {
            text.to_string()
        };
        self.transcript.push(TranscriptEntry { role, text, at });
        if cap > 0 && self.transcript.len() > cap {
            let excess = self.transcript.len() - cap;
            self.transcript.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_state_serde_snake_case() {
        let json = serde_json::to_string(&ConversationState::AwaitingAgent).unwrap();
        assert_eq!(json, "\"awaiting_agent\"");
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ConversationState::AwaitingAgent);
    }

    #[test]
    fn test_unknown_state_decodes_as_initial() {
        let state: ConversationState = serde_json::from_str("\"cotacao_legacy\"").unwrap();
        assert_eq!(state, ConversationState::Initial);
        assert_eq!(ConversationState::parse_lossy(" Validating "), ConversationState::Validating);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut session = Session::new("5511999990000", t0());
        session.touch(t0() + Duration::minutes(5));
        session.touch(t0() + Duration::minutes(1));
        assert_eq!(session.last_interaction_at(), t0() + Duration::minutes(5));
        assert_eq!(session.elapsed(t0()), Duration::zero());
    }

    #[test]
    fn test_reset_preserves_history_and_contact() {
        let mut session = Session::new("5511999990000", t0());
        session.state = ConversationState::AgentActive;
        session.assigned_agent_id = Some("ana".into());
        session.fields.insert("cep".into(), "01310100".into());
        session.append_history(QuoteRecord {
            reference: "Q-1".into(),
            fields: FieldValues::new(),
            artifact_ref: None,
            completed_at: t0(),
        });

        session.reset();

        assert_eq!(session.state, ConversationState::Initial);
        assert!(session.fields.is_empty());
        assert!(session.assigned_agent_id.is_none());
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.contact_id, "5511999990000");
    }

    #[test]
    fn test_transcript_cap_drops_oldest() {
        let mut session = Session::new("c", t0());
        for i in 0..5 {
            session.record_transcript(TranscriptRole::Contact, &format!("m{}", i), t0(), 3);
        }
        let texts: Vec<_> = session.transcript.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_session_roundtrip_keeps_history() {
        let mut session = Session::new("c", t0());
        session.append_history(QuoteRecord {
            reference: "Q-9".into(),
            fields: FieldValues::new(),
            artifact_ref: None,
            completed_at: t0(),
        });
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
