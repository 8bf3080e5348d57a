//! Scan endpoints: trigger, status, log, callback and result.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDateTime, Utc};
use jobtrack_core::logs::split_lines;
use jobtrack_core::{BuildKey, BuildStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trigger", post(trigger))
        .route("/status", get(status))
        .route("/log", get(log))
        .route("/callback", post(callback))
        .route("/result", get(result))
}

#[derive(Debug, Deserialize)]
struct BuildQuery {
    job_name: String,
    build_number: u64,
}

impl BuildQuery {
    fn key(&self) -> Result<BuildKey, ApiError> {
        Ok(BuildKey::new(self.job_name.clone(), self.build_number)?)
    }
}

#[derive(Debug, Deserialize)]
struct TriggerRequest {
    job_name: String,
    #[serde(default)]
    parameters: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    status: &'static str,
    job_name: String,
    build_number: u64,
    engine_url: String,
}

async fn trigger(
    State(state): State<AppState>,
    payload: Result<Json<TriggerRequest>, JsonRejection>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let Json(req) = payload?;
    info!(job = %req.job_name, "Triggering scan job");

    let build = state.tracker.trigger(&req.job_name, &req.parameters).await?;
    Ok(Json(TriggerResponse {
        status: "triggered",
        job_name: build.job_name,
        build_number: build.build_number,
        engine_url: build.engine_url,
    }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: BuildStatus,
    progress_percent: f64,
    start_time: Option<DateTime<Utc>>,
    estimated_end_time: Option<DateTime<Utc>>,
}

async fn status(
    State(state): State<AppState>,
    query: Result<Query<BuildQuery>, QueryRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Query(query) = query?;
    let key = query.key()?;

    let view = state.tracker.status_view(&key).await?;
    Ok(Json(StatusResponse {
        status: view.record.status,
        progress_percent: view.record.progress_percent,
        start_time: view.started_at,
        estimated_end_time: view.estimated_end_at,
    }))
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    job_name: String,
    build_number: u64,
    tail: Option<usize>,
}

#[derive(Debug, Serialize)]
struct LogResponse {
    lines: Vec<String>,
}

async fn log(
    State(state): State<AppState>,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> Result<Json<LogResponse>, ApiError> {
    let Query(query) = query?;
    let key = BuildKey::new(query.job_name, query.build_number)?;

    let text = state.tracker.fetch_logs(&key, query.tail).await?;
    Ok(Json(LogResponse {
        lines: split_lines(&text),
    }))
}

#[derive(Debug, Deserialize)]
struct CallbackRequest {
    job_name: String,
    build_number: u64,
    status: String,
    #[serde(default)]
    results: HashMap<String, String>,
    /// Informational only, so any shape is accepted. See `callback_timestamp`.
    #[serde(default)]
    timestamp: Option<Value>,
}

/// Read a callback's send time. RFC 3339 and offset-less ISO 8601 (taken as
/// UTC) are understood; anything else is logged and dropped.
fn callback_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    let parsed = raw.as_str().and_then(|text| {
        DateTime::parse_from_rfc3339(text)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|ts| ts.and_utc())
            })
    });
    if parsed.is_none() && !raw.is_null() {
        warn!(timestamp = %raw, "Ignoring unreadable callback timestamp");
    }
    parsed
}

#[derive(Debug, Serialize)]
struct CallbackResponse {
    status: &'static str,
}

async fn callback(
    State(state): State<AppState>,
    payload: Result<Json<CallbackRequest>, JsonRejection>,
) -> Result<Json<CallbackResponse>, ApiError> {
    let Json(req) = payload?;
    let key = BuildKey::new(req.job_name, req.build_number)?;
    let sent_at = req.timestamp.as_ref().and_then(callback_timestamp);
    info!(build = %key, status = %req.status, ?sent_at, "Received callback");

    state
        .tracker
        .ingest_callback(key, &req.status, req.results)
        .await?;
    Ok(Json(CallbackResponse { status: "received" }))
}

#[derive(Debug, Serialize)]
struct ResultResponse {
    job_name: String,
    build_number: u64,
    status: BuildStatus,
    results: HashMap<String, String>,
    timestamp: DateTime<Utc>,
}

async fn result(
    State(state): State<AppState>,
    query: Result<Query<BuildQuery>, QueryRejection>,
) -> Result<Json<ResultResponse>, ApiError> {
    let Query(query) = query?;
    let key = query.key()?;

    let record = state.tracker.get_result(&key).await?;
    Ok(Json(ResultResponse {
        job_name: record.key.job_name,
        build_number: record.key.build_number,
        status: record.status,
        results: record.results,
        timestamp: record.updated_at,
    }))
}
