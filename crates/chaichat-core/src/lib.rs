//! chaichat-core - persona chat with provider failover
//!
//! This crate provides:
//! - Persona registry (built-in personas plus user overrides)
//! - OpenAI and Gemini clients behind a common provider trait
//! - Dispatcher that tries providers in order and reports which one answered
//! - Transcript export and search
//! - Session history over a pluggable key/value store

pub mod dispatcher;
pub mod error;
pub mod history;
pub mod persona;
pub mod providers;
pub mod transcript;

// Re-export main types for convenience
pub use dispatcher::{ChatReply, Credentials, Dispatcher};
pub use error::{ChatError, ProviderAttempt, ProviderFailure};
pub use history::{ChatSession, FileStore, KeyValueStore, MemoryStore, SessionStore};
pub use persona::{Persona, PersonaRegistry, PersonaSummary};
pub use providers::{ChatPrompt, GeminiProvider, LlmProvider, OpenAiProvider, ProviderKind};
pub use transcript::{ExportFormat, ExportOptions, Exporter, SearchQuery, TranscriptMessage};
