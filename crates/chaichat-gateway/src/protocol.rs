//! Gateway HTTP protocol: JSON bodies exchanged with the browser UI

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chaichat_core::{ChatError, ChatSession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// `POST /api/chat` body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub openai_key: Option<String>,
    #[serde(default)]
    pub gemini_key: Option<String>,
    /// Must name a registered persona
    pub persona_id: String,
    /// Append both turns to this session
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `POST /api/sessions` body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
}

/// `GET /api/sessions/{id}/export` query
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportParams {
    pub format: Option<String>,
    pub timestamps: Option<bool>,
    pub code: Option<bool>,
    pub user_only: Option<bool>,
}

/// `GET /api/sessions/{id}/search` query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub filter: Option<String>,
    pub sort: Option<String>,
}

/// Session without its messages, for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
}

impl From<&ChatSession> for SessionSummary {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            message_count: session.messages.len(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            persona_id: session.persona_id.clone(),
        }
    }
}

// ── Error codes ──

pub const ERR_EMPTY_MESSAGE: &str = "empty_message";
pub const ERR_UNKNOWN_PERSONA: &str = "unknown_persona";
pub const ERR_NO_CREDENTIALS: &str = "no_credentials";
pub const ERR_PROVIDER: &str = "provider_error";
pub const ERR_ALL_PROVIDERS_FAILED: &str = "all_providers_failed";
pub const ERR_INVALID_PARAMS: &str = "invalid_params";
pub const ERR_NOT_FOUND: &str = "not_found";
pub const ERR_UNAUTHORIZED: &str = "unauthorized";
pub const ERR_INTERNAL: &str = "internal";

/// Error in a gateway response, rendered as `{"error": {"code", "message"}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: GatewayError,
}

/// Handler error carrying its HTTP status
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ERR_INVALID_PARAMS, message)
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            ERR_NOT_FOUND,
            format!("Session '{}' not found", id),
        )
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            ERR_UNAUTHORIZED,
            "Missing or invalid gateway token",
        )
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let (status, code) = match &err {
            ChatError::EmptyMessage => (StatusCode::BAD_REQUEST, ERR_EMPTY_MESSAGE),
            ChatError::UnknownPersona(_) => (StatusCode::BAD_REQUEST, ERR_UNKNOWN_PERSONA),
            ChatError::NoCredentials => (StatusCode::BAD_REQUEST, ERR_NO_CREDENTIALS),
            ChatError::ProviderError { .. } => (StatusCode::BAD_GATEWAY, ERR_PROVIDER),
            ChatError::AllProvidersFailed { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, ERR_ALL_PROVIDERS_FAILED)
            }
        };
        Self::new(status, code, err.user_message())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Gateway internal error: {:#}", err);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERR_INTERNAL,
            "Internal server error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: GatewayError {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
