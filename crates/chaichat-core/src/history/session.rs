//! Chat sessions persisted as one JSON document

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::KeyValueStore;
use crate::transcript::TranscriptMessage;

/// Storage key holding every session
pub const SESSIONS_KEY: &str = "chat_sessions";

const TITLE_MAX_CHARS: usize = 50;

/// A saved conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<TranscriptMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Persona of the most recent reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    /// Title was generated and may still be replaced by the first message
    #[serde(default)]
    pub auto_title: bool,
}

impl ChatSession {
    /// Give a default-titled session a title from its first user message
    fn retitle(&mut self) {
        if !self.auto_title {
            return;
        }
        let Some(first) = self
            .messages
            .iter()
            .find(|m| m.is_user)
            .or_else(|| self.messages.first())
        else {
            return;
        };

        let text = first.content.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return;
        }
        self.title = if text.chars().count() > TITLE_MAX_CHARS {
            let head: String = text.chars().take(TITLE_MAX_CHARS).collect();
            format!("{}...", head)
        } else {
            text
        };
        self.auto_title = false;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        for (i, message) in self.messages.iter_mut().enumerate() {
            message.sequence = i as u64;
        }
        if let Some(persona) = self.messages.iter().rev().find_map(|m| m.persona_id.clone()) {
            self.persona_id = Some(persona);
        }
        self.retitle();
    }
}

/// Session list over a [`KeyValueStore`]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write cycles on the shared document
    lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<ChatSession>> {
        let Some(raw) = self.store.get(SESSIONS_KEY).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(sessions) => Ok(sessions),
            Err(e) => {
                warn!("Ignoring unreadable chat history: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, sessions: &[ChatSession]) -> Result<()> {
        let raw = serde_json::to_string(sessions).context("Failed to serialize chat history")?;
        self.store.set(SESSIONS_KEY, &raw).await
    }

    /// All sessions, most recently updated first
    pub async fn list(&self) -> Result<Vec<ChatSession>> {
        let _guard = self.lock.lock().await;
        let mut sessions = self.load().await?;
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ChatSession>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_iter().find(|s| s.id == id))
    }

    /// New empty session; untitled sessions are named `Chat N`
    pub async fn create(&self, title: Option<&str>) -> Result<ChatSession> {
        let _guard = self.lock.lock().await;
        let mut sessions = self.load().await?;

        let now = Utc::now();
        let (title, auto_title) = match title.map(str::trim) {
            Some(t) if !t.is_empty() => (t.to_string(), false),
            _ => (format!("Chat {}", sessions.len() + 1), true),
        };
        let session = ChatSession {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            persona_id: None,
            auto_title,
        };
        sessions.insert(0, session.clone());
        self.save(&sessions).await?;
        info!("Created session '{}' ({})", session.title, session.id);
        Ok(session)
    }

    /// Add messages to the end of a session. `None` if it does not exist.
    pub async fn append(
        &self,
        id: &str,
        messages: Vec<TranscriptMessage>,
    ) -> Result<Option<ChatSession>> {
        self.modify(id, |session| session.messages.extend(messages))
            .await
    }

    /// Replace a session's messages. `None` if it does not exist.
    pub async fn update(
        &self,
        id: &str,
        messages: Vec<TranscriptMessage>,
    ) -> Result<Option<ChatSession>> {
        self.modify(id, |session| session.messages = messages).await
    }

    pub async fn rename(&self, id: &str, title: &str) -> Result<Option<ChatSession>> {
        let title = title.trim().to_string();
        self.modify(id, |session| {
            session.title = title;
            session.auto_title = false;
        })
        .await
    }

    async fn modify<F>(&self, id: &str, change: F) -> Result<Option<ChatSession>>
    where
        F: FnOnce(&mut ChatSession),
    {
        let _guard = self.lock.lock().await;
        let mut sessions = self.load().await?;
        let Some(session) = sessions.iter_mut().find(|s| s.id == id) else {
            debug!("Session {} not found", id);
            return Ok(None);
        };
        change(session);
        session.touch();
        let updated = session.clone();
        self.save(&sessions).await?;
        Ok(Some(updated))
    }

    /// Returns whether a session was removed
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut sessions = self.load().await?;
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.save(&sessions).await?;
        info!("Deleted session {}", id);
        Ok(true)
    }

    /// Drop every session
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.remove(SESSIONS_KEY).await?;
        info!("Cleared chat history");
        Ok(())
    }
}
