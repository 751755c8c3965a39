//! Conversation engine for the quote intake assistant
//!
//! Components, leaves first:
//! - `extractor`: pattern and assisted strategies behind one `Extractor` trait
//! - `merge`: validated, non-clobbering merge of extracted candidates
//! - `handoff`: keyword and timeout driven bot/operator transitions
//! - `state_machine`: one transition function with a per-state dispatch table
//! - `session_store`: per-contact records with serialized writers
//! - `engine`: `ConversationEngine`, the single entry point per inbound message

pub mod engine;
pub mod extractor;
pub mod handoff;
pub mod merge;
pub mod session_store;
pub mod state_machine;
pub mod summary;

pub use engine::{ConversationEngine, TurnOutcome};
pub use extractor::{build_extractor, AssistedExtractor, Extractor, PatternExtractor};
pub use handoff::HandoffCoordinator;
pub use merge::{merge_candidates, MergeReport};
pub use session_store::{InMemorySessionStore, SessionGuard, SessionStore};
pub use state_machine::{ResetReason, StateMachine, Transition};
pub use summary::FormRenderer;

/// Convert a configured duration for comparisons against chrono timestamps
pub(crate) fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
