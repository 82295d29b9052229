//! Provider-agnostic types for the chat dispatch layer

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderFailure;

/// Sampling temperature shared by both vendors
pub const TEMPERATURE: f32 = 0.7;

/// Upper bound on generated tokens per reply
pub const MAX_OUTPUT_TOKENS: u32 = 1000;

/// Which backend produced (or failed to produce) a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    /// Wire tag, as surfaced in `usedProvider`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// Vendor name for user-facing text
    pub fn vendor(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Gemini => "Gemini",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Vendor-neutral prompt for one turn.
///
/// `system` is the persona's instruction block, untouched. `user` is the
/// message as typed. `speaker` is the persona's display name, used by vendors
/// that take a single concatenated prompt to label the reply turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatPrompt<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub speaker: &'a str,
}

/// Trait that every LLM backend implements
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> ProviderKind;

    /// Model identifier (e.g. "gpt-4o")
    fn model(&self) -> &str;

    /// Perform exactly one request and return the reply text, trimmed
    async fn complete(
        &self,
        prompt: &ChatPrompt<'_>,
        credential: &str,
    ) -> Result<String, ProviderFailure>;
}

/// Pull `error.message` out of a vendor error body, falling back to a status line
pub(crate) fn vendor_error_message(kind: ProviderKind, status: u16, body: &str) -> String {
    serde_json::from_str::<VendorErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("{} API failed with status {}", kind.vendor(), status))
}

/// Map a reqwest error to a transport failure without the request URL
pub(crate) fn transport_failure(err: reqwest::Error) -> ProviderFailure {
    let err = err.without_url();
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    ProviderFailure::Transport(format!("{}: {}", kind, err))
}

#[derive(Debug, Deserialize)]
struct VendorErrorBody {
    error: Option<VendorError>,
}

#[derive(Debug, Deserialize)]
struct VendorError {
    message: Option<String>,
}
