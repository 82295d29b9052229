//! Gateway HTTP server: Axum router over the dispatcher and session history

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use chaichat_core::transcript::{ExportFormat, ExportOptions, Exporter, MessageFilter, SortOrder, search};
use chaichat_core::{ChatReply, Credentials, Dispatcher, SearchQuery, SessionStore, TranscriptMessage};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::auth;
use crate::protocol::{
    ApiError, ChatRequest, CreateSessionRequest, ExportParams, SearchParams, SessionSummary,
};

/// Shared state for all requests
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionStore>,
    pub auth_token: String,
    pub start_time: std::time::Instant,
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(
        bind: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        sessions: Arc<SessionStore>,
        auth_token: String,
    ) -> Self {
        let state = GatewayState {
            dispatcher,
            sessions,
            auth_token,
            start_time: std::time::Instant::now(),
        };
        Self { state, bind }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.state.sessions
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/api/personas", get(personas_handler))
            .route("/api/chat", post(chat_handler))
            .route(
                "/api/sessions",
                get(list_sessions_handler).post(create_session_handler),
            )
            .route(
                "/api/sessions/{id}",
                get(get_session_handler).delete(delete_session_handler),
            )
            .route("/api/sessions/{id}/export", get(export_session_handler))
            .route("/api/sessions/{id}/search", get(search_session_handler))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::require_token,
            ));

        Router::new()
            .route("/api/status", get(status_handler))
            .merge(api)
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Start the server (blocks until the process ends)
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Start the server, draining connections once `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", self.bind);
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Gateway stopped");
        Ok(())
    }

    /// Start the server in the background, returning a handle
    pub fn spawn(self) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

// ── HTTP Handlers ──

async fn status_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let sessions = match state.sessions.list().await {
        Ok(list) => Some(list.len()),
        Err(e) => {
            warn!("Status: failed to read chat history: {:#}", e);
            None
        }
    };
    Json(serde_json::json!({
        "status": "ok",
        "personas": state.dispatcher.personas().len(),
        "providers": state.dispatcher.provider_order(),
        "sessions": sessions,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

async fn personas_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let personas = state.dispatcher.personas();
    let summaries: Vec<_> = personas.all().iter().map(|p| p.summary()).collect();
    Json(serde_json::json!({
        "personas": summaries,
        "default": personas.default_id(),
    }))
}

async fn chat_handler(
    State(state): State<GatewayState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::invalid_params(e.body_text()))?;

    // Reject unknown sessions before spending a provider call
    if let Some(session_id) = req.session_id.as_deref() {
        if state.sessions.get(session_id).await?.is_none() {
            return Err(ApiError::session_not_found(session_id));
        }
    }

    let credentials = Credentials::new(req.openai_key.as_deref(), req.gemini_key.as_deref());
    let reply = state
        .dispatcher
        .send_chat_message(&req.message, &credentials, &req.persona_id)
        .await?;

    if let Some(session_id) = req.session_id.as_deref() {
        let turns = vec![
            TranscriptMessage::user(req.message.as_str()),
            TranscriptMessage::assistant(&reply),
        ];
        // The reply is already paid for; a history failure must not lose it
        match state.sessions.append(session_id, turns).await {
            Ok(Some(_)) => {}
            // Deleted while the request was in flight
            Ok(None) => debug!("Session {} vanished before reply was saved", session_id),
            Err(e) => warn!("Failed to save reply to session {}: {:#}", session_id, e),
        }
    }

    Ok(Json(reply))
}

async fn list_sessions_handler(
    State(state): State<GatewayState>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.sessions.list().await?;
    let summaries: Vec<SessionSummary> = sessions.iter().map(SessionSummary::from).collect();
    Ok(Json(serde_json::json!({ "sessions": summaries })))
}

async fn create_session_handler(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::invalid_params(format!("Invalid JSON: {}", e)))?
    };
    let session = state.sessions.create(req.title.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.sessions.get(&id).await? {
        Some(session) => Ok(Json(session)),
        None => Err(ApiError::session_not_found(&id)),
    }
}

async fn delete_session_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::session_not_found(&id))
    }
}

async fn export_session_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    params: Result<Query<ExportParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::invalid_params(e.body_text()))?;
    let format: ExportFormat = params
        .format
        .as_deref()
        .unwrap_or("txt")
        .parse()
        .map_err(|e: anyhow::Error| ApiError::invalid_params(e.to_string()))?;

    let session = state
        .sessions
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::session_not_found(&id))?;

    let personas = state.dispatcher.personas();
    let persona_id = session
        .persona_id
        .as_deref()
        .unwrap_or_else(|| personas.default_id());
    let defaults = ExportOptions::default();
    let exporter = Exporter::new(personas, persona_id).options(ExportOptions {
        include_timestamps: params.timestamps.unwrap_or(defaults.include_timestamps),
        include_code_blocks: params.code.unwrap_or(defaults.include_code_blocks),
        user_messages_only: params.user_only.unwrap_or(defaults.user_messages_only),
    });

    let body = exporter.render(&session.messages, format);
    let disposition = format!("attachment; filename=\"{}\"", exporter.filename(format));
    Ok((
        [
            (header::CONTENT_TYPE, format.mime_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

async fn search_session_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::invalid_params(e.body_text()))?;
    let invalid = |e: anyhow::Error| ApiError::invalid_params(e.to_string());
    let query = SearchQuery::new(params.q.unwrap_or_default())
        .filter(
            params
                .filter
                .as_deref()
                .unwrap_or("all")
                .parse::<MessageFilter>()
                .map_err(invalid)?,
        )
        .sort(
            params
                .sort
                .as_deref()
                .unwrap_or("newest")
                .parse::<SortOrder>()
                .map_err(invalid)?,
        );

    let session = state
        .sessions
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::session_not_found(&id))?;

    let hits = search(&session.messages, &query);
    Ok(Json(serde_json::json!({
        "query": query.text,
        "count": hits.len(),
        "results": hits,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chaichat_core::providers::{ChatPrompt, LlmProvider, ProviderKind};
    use chaichat_core::{KeyValueStore, MemoryStore, PersonaRegistry, ProviderFailure};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const TOKEN: &str = "gateway-secret";

    struct MockProvider {
        kind: ProviderKind,
        outcome: Result<String, ProviderFailure>,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(kind: ProviderKind, outcome: Result<&str, ProviderFailure>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                outcome: outcome.map(str::to_string),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        async fn complete(
            &self,
            _prompt: &ChatPrompt<'_>,
            _credential: &str,
        ) -> Result<String, ProviderFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn http(status: u16, message: &str) -> ProviderFailure {
        ProviderFailure::Http {
            status,
            vendor_message: message.to_string(),
        }
    }

    /// Memory store that refuses writes once `read_only` is set
    #[derive(Default)]
    struct ReadOnlyAfter {
        inner: MemoryStore,
        read_only: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for ReadOnlyAfter {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            if self.read_only.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key).await
        }
    }

    async fn start(primary: Arc<MockProvider>, secondary: Arc<MockProvider>, token: &str) -> String {
        start_with_store(primary, secondary, token, Arc::new(MemoryStore::new())).await
    }

    async fn start_with_store(
        primary: Arc<MockProvider>,
        secondary: Arc<MockProvider>,
        token: &str,
        store: Arc<dyn KeyValueStore>,
    ) -> String {
        let personas = Arc::new(PersonaRegistry::builtin().unwrap());
        let providers: Vec<Arc<dyn LlmProvider>> = vec![primary as Arc<dyn LlmProvider>, secondary];
        let dispatcher = Arc::new(Dispatcher::new(personas, providers).unwrap());
        let sessions = Arc::new(SessionStore::new(store));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = GatewayServer::new(addr, dispatcher, sessions, token.to_string());
        tokio::spawn(server.serve(listener, std::future::pending()));
        format!("http://{}", addr)
    }

    async fn start_ok() -> String {
        start(
            MockProvider::new(ProviderKind::OpenAi, Ok("Hello from OpenAI")),
            MockProvider::new(ProviderKind::Gemini, Ok("Hello from Gemini")),
            "",
        )
        .await
    }

    async fn post_chat(base: &str, body: Value) -> (u16, Value) {
        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_status_is_public() {
        let base = start(
            MockProvider::new(ProviderKind::OpenAi, Ok("x")),
            MockProvider::new(ProviderKind::Gemini, Ok("y")),
            TOKEN,
        )
        .await;
        let resp = reqwest::get(format!("{}/api/status", base)).await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["personas"], 2);
        assert_eq!(body["providers"], json!(["openai", "gemini"]));
    }

    #[tokio::test]
    async fn test_token_required_on_api_routes() {
        let base = start(
            MockProvider::new(ProviderKind::OpenAi, Ok("x")),
            MockProvider::new(ProviderKind::Gemini, Ok("y")),
            TOKEN,
        )
        .await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{}/api/personas", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "unauthorized");

        for bad in ["Bearer wrong", "Basic gateway-secret", "Bearer "] {
            let resp = client
                .get(format!("{}/api/sessions", base))
                .header("authorization", bad)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status().as_u16(), 401, "{bad}");
        }

        let resp = client
            .get(format!("{}/api/personas", base))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_personas_hide_system_prompt() {
        let base = start_ok().await;
        let text = reqwest::get(format!("{}/api/personas", base))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["default"], "hitesh");
        assert_eq!(body["personas"][1]["id"], "piyush");
        assert!(!text.contains("system_prompt"));
        assert!(!text.contains("systemPrompt"));
    }

    #[tokio::test]
    async fn test_chat_primary_success() {
        let base = start_ok().await;
        let (status, body) = post_chat(
            &base,
            json!({"message": "Hi", "openaiKey": "sk-a", "geminiKey": "g-b", "personaId": "piyush"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["response"], "Hello from OpenAI");
        assert_eq!(body["usedProvider"], "openai");
        assert_eq!(body["personaId"], "piyush");
        assert_eq!(body["fallbackUsed"], false);
    }

    #[tokio::test]
    async fn test_chat_falls_back_to_gemini() {
        let openai = MockProvider::new(ProviderKind::OpenAi, Err(http(401, "Incorrect API key provided")));
        let gemini = MockProvider::new(ProviderKind::Gemini, Ok("Closures are..."));
        let base = start(openai.clone(), gemini.clone(), "").await;

        let (status, body) = post_chat(
            &base,
            json!({"message": "Explain closures", "openaiKey": "bad", "geminiKey": "good", "personaId": "hitesh"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["response"], "Closures are...");
        assert_eq!(body["usedProvider"], "gemini");
        assert_eq!(body["fallbackUsed"], true);
        assert_eq!(openai.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gemini.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chat_error_mapping() {
        let base = start(
            MockProvider::new(ProviderKind::OpenAi, Err(http(429, "Rate limit reached"))),
            MockProvider::new(ProviderKind::Gemini, Err(ProviderFailure::EmptyCompletion)),
            "",
        )
        .await;

        let (status, body) = post_chat(&base, json!({"message": "Hi", "personaId": "hitesh"})).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "no_credentials");

        let (status, body) =
            post_chat(&base, json!({"message": "  ", "openaiKey": "k", "personaId": "hitesh"})).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "empty_message");

        let (status, body) =
            post_chat(&base, json!({"message": "Hi", "openaiKey": "k", "personaId": "nobody"})).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "unknown_persona");

        let (status, body) =
            post_chat(&base, json!({"message": "Hi", "openaiKey": "k", "personaId": "hitesh"})).await;
        assert_eq!(status, 502);
        assert_eq!(body["error"]["message"], "Rate limit reached");

        let (status, body) = post_chat(
            &base,
            json!({"message": "Hi", "openaiKey": "k", "geminiKey": "g", "personaId": "hitesh"}),
        )
        .await;
        assert_eq!(status, 503);
        assert_eq!(body["error"]["code"], "all_providers_failed");
        assert_eq!(
            body["error"]["message"],
            "Both AI services are currently unavailable. Please check your API keys and try again."
        );
    }

    #[tokio::test]
    async fn test_chat_rejects_malformed_body() {
        let base = start_ok().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", base))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "invalid_params");
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let base = start_ok().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/api/sessions", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 201);
        let session: Value = resp.json().await.unwrap();
        let id = session["id"].as_str().unwrap().to_string();
        assert_eq!(session["title"], "Chat 1");

        let (status, _) = post_chat(
            &base,
            json!({"message": "What is `ownership`?", "openaiKey": "k", "personaId": "piyush", "sessionId": id}),
        )
        .await;
        assert_eq!(status, 200);

        let session: Value = client
            .get(format!("{}/api/sessions/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(session["title"], "What is `ownership`?");
        assert_eq!(session["messages"].as_array().unwrap().len(), 2);
        assert_eq!(session["messages"][1]["provider"], "openai");

        let list: Value = client
            .get(format!("{}/api/sessions", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["sessions"][0]["messageCount"], 2);

        let resp = client
            .get(format!(
                "{}/api/sessions/{}/export?format=md&timestamps=false&code=false",
                base, id
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.headers()["content-type"], "text/markdown");
        let disposition = resp.headers()["content-disposition"].to_str().unwrap().to_string();
        assert!(disposition.contains("piyush-chat-"));
        let text = resp.text().await.unwrap();
        assert!(text.contains("**You**:\nWhat is *[Code Removed]*?"));
        assert!(text.contains("**Piyush Garg**:\nHello from OpenAI"));

        let hits: Value = client
            .get(format!("{}/api/sessions/{}/search?q=HELLO&filter=ai", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(hits["count"], 1);
        assert_eq!(hits["results"][0]["message"]["content"], "Hello from OpenAI");

        let resp = client
            .delete(format!("{}/api/sessions/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 204);

        let resp = client
            .get(format!("{}/api/sessions/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_chat_unknown_session_skips_providers() {
        let openai = MockProvider::new(ProviderKind::OpenAi, Ok("x"));
        let base = start(openai.clone(), MockProvider::new(ProviderKind::Gemini, Ok("y")), "").await;
        let (status, body) = post_chat(
            &base,
            json!({"message": "Hi", "openaiKey": "k", "personaId": "hitesh", "sessionId": "missing"}),
        )
        .await;
        assert_eq!(status, 404);
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(openai.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chat_requires_persona() {
        let openai = MockProvider::new(ProviderKind::OpenAi, Ok("x"));
        let base = start(openai.clone(), MockProvider::new(ProviderKind::Gemini, Ok("y")), "").await;

        let (status, body) = post_chat(&base, json!({"message": "Hi", "openaiKey": "k"})).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "invalid_params");

        let (status, body) =
            post_chat(&base, json!({"message": "Hi", "openaiKey": "k", "personaId": ""})).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "unknown_persona");
        assert_eq!(openai.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reply_survives_history_write_failure() {
        let openai = MockProvider::new(ProviderKind::OpenAi, Ok("Still here"));
        let store = Arc::new(ReadOnlyAfter::default());
        let base = start_with_store(
            openai.clone(),
            MockProvider::new(ProviderKind::Gemini, Ok("y")),
            "",
            store.clone(),
        )
        .await;

        let session: Value = reqwest::Client::new()
            .post(format!("{}/api/sessions", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        store.read_only.store(true, Ordering::SeqCst);

        let (status, body) = post_chat(
            &base,
            json!({"message": "Hi", "openaiKey": "k", "personaId": "hitesh", "sessionId": session["id"]}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["response"], "Still here");
        assert_eq!(openai.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_export_rejects_unknown_format() {
        let base = start_ok().await;
        let resp = reqwest::get(format!("{}/api/sessions/any/export?format=pdf", base))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
    }
}
