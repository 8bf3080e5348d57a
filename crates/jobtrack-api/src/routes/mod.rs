//! API routes.

pub mod health;
pub mod scan;

use crate::auth::require_api_key;
use crate::{AppState, VERSION};
use axum::routing::get;
use axum::{Json, Router, middleware};
use serde_json::{Value, json};

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    let scan = scan::router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        require_api_key,
    ));

    Router::new()
        .route("/", get(root))
        .nest("/api/scan", scan)
        .merge(health::router())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "jobtrack build tracking API",
        "version": VERSION,
    }))
}
