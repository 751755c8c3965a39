//! Collaborator traits
//!
//! The engine depends only on these interfaces:
//! - `Clock`: current time, injectable for tests
//! - `MessageSender`: outbound text and document delivery to the contact
//! - `QuoteGenerator`: files a completed form and returns a reference
//! - `ExtractionService`: structured extraction backing the assisted strategy

mod clock;
mod collaborators;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    ExtractionService, MessageSender, OutboundDocument, QuoteGenerator, QuoteOutcome,
};
