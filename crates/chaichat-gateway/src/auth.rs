//! Gateway authentication: optional bearer token on API routes

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::protocol::ApiError;
use crate::server::GatewayState;

/// Whether the request carries the configured token.
///
/// An empty configured token disables auth.
pub(crate) fn is_authorized(configured: &str, headers: &HeaderMap) -> bool {
    if configured.is_empty() {
        return true;
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .is_some_and(|presented| tokens_match(configured.as_bytes(), presented.as_bytes()))
}

fn bearer_token(value: &str) -> Option<&str> {
    let token = value.trim().strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

// Only the length leaks through timing
fn tokens_match(expected: &[u8], presented: &[u8]) -> bool {
    expected.len() == presented.len()
        && expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Rejects requests without the configured token
pub(crate) async fn require_token(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if !is_authorized(&state.auth_token, &headers) {
        warn!("Gateway auth: rejected {} {}", request.method(), request.uri().path());
        return ApiError::unauthorized().into_response();
    }
    next.run(request).await
}
