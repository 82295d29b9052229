//! Local HTTP endpoint standing in for a vendor API

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::IntoResponse;
use serde_json::Value;

/// One request as the vendor saw it
#[derive(Debug, Clone)]
pub(crate) struct SeenRequest {
    pub method: Method,
    pub uri: Uri,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct Canned {
    status: StatusCode,
    body: &'static str,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

/// Answers every request with a fixed status and JSON body
pub(crate) struct FakeVendor {
    pub base_url: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl FakeVendor {
    pub async fn start(status: u16, body: &'static str) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let canned = Canned {
            status: StatusCode::from_u16(status).unwrap(),
            body,
            seen: seen.clone(),
        };
        let app = Router::new().fallback(respond).with_state(canned);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await });
        Self { base_url, seen }
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

async fn respond(
    State(canned): State<Canned>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    canned.seen.lock().unwrap().push(SeenRequest {
        method,
        uri,
        authorization,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });
    (
        canned.status,
        [(header::CONTENT_TYPE, "application/json")],
        canned.body,
    )
}
