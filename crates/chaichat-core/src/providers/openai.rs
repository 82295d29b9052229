//! OpenAI chat completions provider

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderFailure;

use super::types::{
    ChatPrompt, LlmProvider, MAX_OUTPUT_TOKENS, ProviderKind, TEMPERATURE, transport_failure,
    vendor_error_message,
};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// OpenAI provider. Holds no credential; the key arrives with each call.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new(DEFAULT_OPENAI_MODEL, DEFAULT_OPENAI_BASE_URL)
    }
}

impl OpenAiProvider {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), model, base_url)
    }

    /// Share an existing connection pool
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

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// System and user stay in separate roles
    fn build_request<'a>(&'a self, prompt: &ChatPrompt<'a>) -> OpenAiRequest<'a> {
        OpenAiRequest {
            model: &self.model,
            messages: vec![
                OpenAiMessage {
                    role: "system",
                    content: prompt.system,
                },
                OpenAiMessage {
                    role: "user",
                    content: prompt.user,
                },
            ],
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        }
    }

    /// Extract `choices[0].message.content`
    fn parse_response(body: &str) -> Result<String, ProviderFailure> {
        let resp: OpenAiResponse =
            serde_json::from_str(body).map_err(|e| ProviderFailure::Decode(e.to_string()))?;

        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderFailure::EmptyCompletion);
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &ChatPrompt<'_>,
        credential: &str,
    ) -> Result<String, ProviderFailure> {
        let body = self.build_request(prompt);

        debug!(
            "OpenAI request: model={}, system_chars={}, user_chars={}",
            self.model,
            prompt.system.len(),
            prompt.user.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(credential)
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
                vendor_message: vendor_error_message(ProviderKind::OpenAi, status.as_u16(), &text),
            });
        }

        let reply = Self::parse_response(&text)?;
        debug!("OpenAI response: {} chars", reply.len());
        Ok(reply)
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiReplyMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiReplyMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fake_vendor::FakeVendor;
    use axum::http::Method;

    fn prompt() -> ChatPrompt<'static> {
        ChatPrompt {
            system: "You are Hitesh.",
            user: "Explain closures",
            speaker: "Hitesh Choudhary",
        }
    }

    #[test]
    fn test_request_shape() {
        let provider = OpenAiProvider::default();
        let value = serde_json::to_value(provider.build_request(&prompt())).unwrap();

        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["max_tokens"], 1000);
        assert!((value["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][0]["content"], "You are Hitesh.");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "Explain closures");
        assert_eq!(value["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let provider = OpenAiProvider::new("gpt-4o-mini", "http://localhost:8080/");
        assert_eq!(provider.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(provider.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_parse_response_text() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"  Closures are...\n"},"finish_reason":"stop"}]}"#;
        assert_eq!(OpenAiProvider::parse_response(body).unwrap(), "Closures are...");
    }

    #[test]
    fn test_parse_response_empty_choices() {
        assert_eq!(
            OpenAiProvider::parse_response(r#"{"choices":[]}"#),
            Err(ProviderFailure::EmptyCompletion)
        );
        assert_eq!(
            OpenAiProvider::parse_response(r#"{"id":"x"}"#),
            Err(ProviderFailure::EmptyCompletion)
        );
    }

    #[test]
    fn test_parse_response_null_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert_eq!(
            OpenAiProvider::parse_response(body),
            Err(ProviderFailure::EmptyCompletion)
        );
    }

    #[test]
    fn test_parse_response_malformed() {
        assert!(matches!(
            OpenAiProvider::parse_response("not json"),
            Err(ProviderFailure::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_sends_bearer_key() {
        let vendor = FakeVendor::start(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":" Closures capture scope. "}}]}"#,
        )
        .await;
        let provider = OpenAiProvider::new("gpt-test", &vendor.base_url);

        let reply = provider.complete(&prompt(), "sk-test").await.unwrap();
        assert_eq!(reply, "Closures capture scope.");

        let seen = vendor.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(seen[0].uri.path(), "/v1/chat/completions");
        assert_eq!(seen[0].uri.query(), None);
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer sk-test"));
        assert_eq!(seen[0].body["model"], "gpt-test");
        assert_eq!(seen[0].body["messages"][1]["content"], "Explain closures");
    }

    #[tokio::test]
    async fn test_complete_maps_vendor_error() {
        let vendor = FakeVendor::start(
            401,
            r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#,
        )
        .await;
        let provider = OpenAiProvider::new("gpt-test", &vendor.base_url);

        let err = provider.complete(&prompt(), "sk-bad").await.unwrap_err();
        assert_eq!(
            err,
            ProviderFailure::Http {
                status: 401,
                vendor_message: "Incorrect API key provided".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_complete_error_without_vendor_body() {
        let vendor = FakeVendor::start(502, "bad gateway").await;
        let provider = OpenAiProvider::new("gpt-test", &vendor.base_url);

        let err = provider.complete(&prompt(), "sk-test").await.unwrap_err();
        assert_eq!(
            err,
            ProviderFailure::Http {
                status: 502,
                vendor_message: "OpenAI API failed with status 502".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        // Nothing listens on port 1
        let provider = OpenAiProvider::new("gpt-4o", "http://127.0.0.1:1");
        let err = provider.complete(&prompt(), "sk-secret").await.unwrap_err();
        match err {
            ProviderFailure::Transport(msg) => assert!(!msg.contains("sk-secret")),
            other => panic!("expected transport failure, got {:?}", other),
        }
    }
}
