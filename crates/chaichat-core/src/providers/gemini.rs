//! Google Gemini generateContent provider

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderFailure;

use super::types::{
    ChatPrompt, LlmProvider, MAX_OUTPUT_TOKENS, ProviderKind, TEMPERATURE, transport_failure,
    vendor_error_message,
};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";

const TOP_K: u32 = 40;
const TOP_P: f32 = 0.95;

/// Google Gemini provider. The key travels as the `key` query parameter.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new(DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_BASE_URL)
    }
}

impl GeminiProvider {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), model, base_url)
    }

    pub fn with_client(
        client: Client,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Endpoint without the key; the key is attached with `.query()` so it
    /// never ends up in a formatted string
    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Gemini takes one prompt: instruction block, blank line, then the labelled turn
    fn prompt_text(prompt: &ChatPrompt<'_>) -> String {
        format!(
            "{}\n\nUser: {}\n\n{}:",
            prompt.system, prompt.user, prompt.speaker
        )
    }

    fn build_request(prompt: &ChatPrompt<'_>) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: Self::prompt_text(prompt),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                top_k: TOP_K,
                top_p: TOP_P,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        }
    }

    /// Extract `candidates[0].content.parts[0].text`
    fn parse_response(body: &str) -> Result<String, ProviderFailure> {
        let resp: GeminiResponse =
            serde_json::from_str(body).map_err(|e| ProviderFailure::Decode(e.to_string()))?;

        let text = resp
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderFailure::EmptyCompletion);
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &ChatPrompt<'_>,
        credential: &str,
    ) -> Result<String, ProviderFailure> {
        let body = Self::build_request(prompt);

        debug!(
            "Gemini request: model={}, prompt_chars={}",
            self.model,
            body.contents[0].parts[0].text.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", credential)])
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_failure)?;

        if !status.is_success() {
            return Err(ProviderFailure::Http {
                status: status.as_u16(),
                vendor_message: vendor_error_message(ProviderKind::Gemini, status.as_u16(), &text),
            });
        }

        let reply = Self::parse_response(&text)?;
        debug!("Gemini response: {} chars", reply.len());
        Ok(reply)
    }
}

// ── Gemini wire types ──

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiReplyContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiReplyContent {
    #[serde(default)]
    parts: Vec<GeminiReplyPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiReplyPart {
    text: Option<String>,
}
