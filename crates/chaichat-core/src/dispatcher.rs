//! Chat dispatch with automatic failover across providers

use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{ChatError, ProviderAttempt};
use crate::persona::PersonaRegistry;
use crate::providers::{ChatPrompt, GeminiProvider, LlmProvider, OpenAiProvider, ProviderKind};

/// API keys supplied by the caller for one turn. Blank keys count as absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    openai: Option<String>,
    gemini: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai", &self.openai.as_ref().map(|_| "***"))
            .field("gemini", &self.gemini.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    pub fn new(openai: Option<&str>, gemini: Option<&str>) -> Self {
        Self {
            openai: normalize(openai),
            gemini: normalize(gemini),
        }
    }

    pub fn with_openai(mut self, key: &str) -> Self {
        self.openai = normalize(Some(key));
        self
    }

    pub fn with_gemini(mut self, key: &str) -> Self {
        self.gemini = normalize(Some(key));
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::OpenAi => self.openai.as_deref(),
            ProviderKind::Gemini => self.gemini.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.openai.is_none() && self.gemini.is_none()
    }
}

fn normalize(key: Option<&str>) -> Option<String> {
    key.map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// Result of a successful turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    /// Assistant text, trimmed
    pub response: String,
    /// The provider that produced `response`
    pub used_provider: ProviderKind,
    pub model: String,
    pub persona_id: String,
    /// True when the first provider attempted did not produce the reply
    pub fallback_used: bool,
}

/// Picks a provider for each turn, in failover order, one attempt each.
///
/// Stateless between calls: credentials and persona text are per call, so
/// concurrent turns for different conversations are independent.
pub struct Dispatcher {
    personas: Arc<PersonaRegistry>,
    /// Failover order (index 0 = primary)
    providers: Vec<Arc<dyn LlmProvider>>,
}

impl Dispatcher {
    /// Create a dispatcher over providers in failover order
    pub fn new(personas: Arc<PersonaRegistry>, providers: Vec<Arc<dyn LlmProvider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(anyhow!("Dispatcher requires at least one provider"));
        }
        Ok(Self {
            personas,
            providers,
        })
    }

    /// OpenAI first, Gemini as fallback, default models and endpoints
    pub fn with_defaults(personas: Arc<PersonaRegistry>) -> Self {
        Self {
            personas,
            providers: vec![
                Arc::new(OpenAiProvider::default()),
                Arc::new(GeminiProvider::default()),
            ],
        }
    }

    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    /// Provider kinds in the order they are tried
    pub fn provider_order(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    /// Positional form: primary key is OpenAI's, secondary is Gemini's
    pub async fn send(
        &self,
        message: &str,
        primary_key: &str,
        secondary_key: Option<&str>,
        persona_id: &str,
    ) -> std::result::Result<ChatReply, ChatError> {
        let credentials = Credentials::new(Some(primary_key), secondary_key);
        self.send_chat_message(message, &credentials, persona_id).await
    }

    /// Produce one assistant reply for `message` in the voice of `persona_id`
    pub async fn send_chat_message(
        &self,
        message: &str,
        credentials: &Credentials,
        persona_id: &str,
    ) -> std::result::Result<ChatReply, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let persona = self
            .personas
            .get(persona_id)
            .ok_or_else(|| ChatError::UnknownPersona(persona_id.to_string()))?;

        let candidates: Vec<(&Arc<dyn LlmProvider>, &str)> = self
            .providers
            .iter()
            .filter_map(|p| credentials.get(p.kind()).map(|key| (p, key)))
            .collect();

        if candidates.is_empty() {
            warn!("Chat turn rejected: no API keys provided");
            return Err(ChatError::NoCredentials);
        }

        // Assembled once, identical for every provider attempted
        let prompt = ChatPrompt {
            system: &persona.system_prompt,
            user: message,
            speaker: persona.speaker(),
        };

        let mut failures: Vec<ProviderAttempt> = Vec::new();

        for (idx, (provider, key)) in candidates.iter().enumerate() {
            debug!(
                "Trying provider {} ({}) {}/{} for persona '{}'",
                provider.kind(),
                provider.model(),
                idx + 1,
                candidates.len(),
                persona.id,
            );

            match provider.complete(&prompt, key).await {
                Ok(response) => {
                    if idx > 0 {
                        info!(
                            "Request succeeded on failover provider {} ({})",
                            provider.kind(),
                            provider.model()
                        );
                    }
                    return Ok(ChatReply {
                        response,
                        used_provider: provider.kind(),
                        model: provider.model().to_string(),
                        persona_id: persona.id.clone(),
                        fallback_used: idx > 0,
                    });
                }
                Err(cause) => {
                    warn!(
                        "Provider {} ({}) failed: {}",
                        provider.kind(),
                        provider.model(),
                        cause
                    );
                    failures.push(ProviderAttempt {
                        provider: provider.kind(),
                        cause,
                    });
                    if let Some((next, _)) = candidates.get(idx + 1) {
                        info!("Failing over from {} to {}", provider.kind(), next.kind());
                    }
                }
            }
        }

        if failures.len() == 1 {
            let ProviderAttempt { provider, cause } = failures.remove(0);
            return Err(ChatError::ProviderError { provider, cause });
        }

        let err = ChatError::AllProvidersFailed { failures };
        error!("{}", err);
        Err(err)
    }
}
