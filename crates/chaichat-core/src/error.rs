//! Error types for a single chat turn

use thiserror::Error;

use crate::providers::ProviderKind;

/// Shown to the user when every configured provider failed. Causes stay in logs.
pub const ALL_PROVIDERS_FAILED_MESSAGE: &str =
    "Both AI services are currently unavailable. Please check your API keys and try again.";

/// Shown to the user when no key was supplied at all.
pub const NO_CREDENTIALS_MESSAGE: &str =
    "No API keys provided. Please add either OpenAI or Gemini API key.";

/// Why a single provider attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    /// Non-2xx response
    #[error("HTTP {status}: {vendor_message}")]
    Http { status: u16, vendor_message: String },

    /// 2xx response without a usable completion
    #[error("no response generated")]
    EmptyCompletion,

    /// 2xx response whose body could not be decoded
    #[error("malformed response body: {0}")]
    Decode(String),

    /// DNS, connect, timeout, reset
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderFailure {
    /// Text suitable for showing next to the key that failed
    pub fn user_message(&self) -> String {
        match self {
            Self::Http { vendor_message, .. } => vendor_message.clone(),
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One failed attempt, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: ProviderKind,
    pub cause: ProviderFailure,
}

/// Failure of a whole chat turn
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,

    /// The caller asked for a persona that is not registered
    #[error("configuration error: unknown persona '{0}'")]
    UnknownPersona(String),

    #[error("no API keys provided")]
    NoCredentials,

    /// The only provider that could be tried failed
    #[error("{provider} request failed: {cause}")]
    ProviderError {
        provider: ProviderKind,
        cause: ProviderFailure,
    },

    /// Every provider with a key was tried and each one failed
    #[error("all providers failed: {}", describe_attempts(.failures))]
    AllProvidersFailed { failures: Vec<ProviderAttempt> },
}

impl ChatError {
    /// Message for the UI layer. Never includes vendor detail for the
    /// all-failed case.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyMessage => "Please type a message first.".to_string(),
            Self::UnknownPersona(id) => format!("Persona '{}' is not available.", id),
            Self::NoCredentials => NO_CREDENTIALS_MESSAGE.to_string(),
            Self::ProviderError { cause, .. } => cause.user_message(),
            Self::AllProvidersFailed { .. } => ALL_PROVIDERS_FAILED_MESSAGE.to_string(),
        }
    }

    /// Caller bug rather than a runtime condition
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownPersona(_))
    }

    pub fn is_no_credentials(&self) -> bool {
        matches!(self, Self::NoCredentials)
    }

    /// Whether at least one request actually went out
    pub fn reached_network(&self) -> bool {
        matches!(
            self,
            Self::ProviderError { .. } | Self::AllProvidersFailed { .. }
        )
    }

    /// Cause of the first attempted provider, if any was attempted
    pub fn primary_cause(&self) -> Option<&ProviderFailure> {
        match self {
            Self::ProviderError { cause, .. } => Some(cause),
            Self::AllProvidersFailed { failures } => failures.first().map(|a| &a.cause),
            _ => None,
        }
    }

    /// Cause of the fallback provider, only present when a fallback was tried
    pub fn secondary_cause(&self) -> Option<&ProviderFailure> {
        match self {
            Self::AllProvidersFailed { failures } => failures.get(1).map(|a| &a.cause),
            _ => None,
        }
    }
}

fn describe_attempts(failures: &[ProviderAttempt]) -> String {
    failures
        .iter()
        .map(|a| format!("{}: {}", a.provider, a.cause))
        .collect::<Vec<_>>()
        .join("; ")
}
