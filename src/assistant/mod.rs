//! Conversational agronomist assistant.
//!
//! Builds a bounded organization snapshot, scores how complete it is, and
//! hands both to an external chat-completion service.

pub mod completion;
pub mod confidence;
pub mod context;
pub mod prompt;
pub mod service;

pub use completion::{CompletionClient, CompletionConfig, CompletionError, CompletionProvider};
pub use confidence::estimate_confidence;
pub use context::{build_context, OrganizationSnapshot, SourceList};
pub use service::{AgronomistAssistant, ChatAnswer};
