//! Health check endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{AppState, VERSION};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    database: &'static str,
    engine: &'static str,
}

fn connection(ok: bool) -> &'static str {
    if ok { "connected" } else { "disconnected" }
}

/// Storage down is unhealthy; engine down only degrades the service.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (store_ok, engine_ok) = tokio::join!(
        state.tracker.store_healthy(),
        state.tracker.engine_healthy()
    );

    let status = match (store_ok, engine_ok) {
        (false, _) => "unhealthy",
        (true, false) => "degraded",
        (true, true) => "healthy",
    };

    Json(HealthResponse {
        status,
        version: VERSION,
        database: connection(store_ok),
        engine: connection(engine_ok),
    })
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.tracker.store_healthy().await {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
    }
}
