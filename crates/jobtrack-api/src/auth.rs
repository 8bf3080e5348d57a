//! Bearer token check for the scan API.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::AppState;
use crate::error::ApiError;

/// Characters of a rejected key that may appear in logs.
const LOGGED_KEY_PREFIX: usize = 4;

/// Reject requests whose bearer token is not the configured API key.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(req.headers())
        .ok_or_else(|| ApiError::Unauthorized("API key required".to_string()))?;

    if token != state.api_key.as_ref() {
        let prefix: String = token.chars().take(LOGGED_KEY_PREFIX).collect();
        warn!(key_prefix = %prefix, path = %req.uri().path(), "Invalid API key attempt");
        return Err(ApiError::Unauthorized("Invalid API key".to_string()));
    }

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
