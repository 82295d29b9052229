//! LLM provider clients
//!
//! Each backend implements [`LlmProvider`]. The [`Dispatcher`](crate::Dispatcher)
//! walks them in order and fails over on any error.

pub mod gemini;
pub mod openai;
pub mod types;

#[cfg(test)]
pub(crate) mod fake_vendor;

/// HTTP client handed to providers; clone it to share one connection pool
pub use reqwest::Client as HttpClient;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use types::{ChatPrompt, LlmProvider, ProviderKind};
