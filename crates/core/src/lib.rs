//! Core types and traits for the quote intake assistant
//!
//! This crate provides the foundational pieces shared by every other crate:
//! - The per-contact `Session` record and its `ConversationState`
//! - Collaborator traits (message delivery, quote generation, assisted extraction)
//! - An injectable `Clock` for deterministic timeout handling
//! - The shared error type

pub mod error;
pub mod session;
pub mod traits;

pub use error::{Error, Result};
pub use session::{
    ConversationState, FieldValues, QuoteCompleted, QuoteRecord, Session, TranscriptEntry,
    TranscriptRole,
};
pub use traits::{
    Clock, ExtractionService, ManualClock, MessageSender, OutboundDocument, QuoteGenerator,
    QuoteOutcome, SystemClock,
};
