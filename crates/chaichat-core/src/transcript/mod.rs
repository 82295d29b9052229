//! Conversation transcript: messages with persona/provider attribution,
//! plus export and search over them.

mod export;
mod search;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatcher::ChatReply;
use crate::providers::ProviderKind;

pub use export::{ExportFormat, ExportOptions, Exporter};
pub use search::{MessageFilter, SearchHit, SearchQuery, SortOrder, search};

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptMessage {
    pub id: String,
    pub content: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
    /// Position within its session, assigned on append
    #[serde(default)]
    pub sequence: u64,
    /// Persona that answered (assistant messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    /// Provider that produced the answer (assistant messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
}

impl TranscriptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            is_user: true,
            timestamp: Utc::now(),
            sequence: 0,
            persona_id: None,
            provider: None,
        }
    }

    /// Assistant message carrying the reply's persona and provider
    pub fn assistant(reply: &ChatReply) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: reply.response.clone(),
            is_user: false,
            timestamp: Utc::now(),
            sequence: 0,
            persona_id: Some(reply.persona_id.clone()),
            provider: Some(reply.used_provider),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Contains inline or fenced code
    pub fn has_code(&self) -> bool {
        self.content.contains('`')
    }
}
