//! Execution gateway trait over the external job engine.
//!
//! A gateway triggers builds, polls their status and fetches their console
//! output. Every call is independently fallible and bounded by a timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{BuildKey, BuildStatus, Result};

/// A build accepted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredBuild {
    pub job_name: String,
    pub build_number: u64,
    /// Where the build can be inspected on the engine.
    pub engine_url: String,
}

/// One observation of a build's state on the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: BuildStatus,
    /// Estimated, never measured. Capped at 90 while the build is running.
    pub progress_percent: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_end_at: Option<DateTime<Utc>>,
}

/// Trait for external job engines.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Name of this gateway.
    fn name(&self) -> &'static str;

    /// Start a build of `job_name`.
    ///
    /// Fails with `TriggerFailed` when the engine rejects the request or is
    /// unreachable, and with `BuildNumberUnresolved` when the build was
    /// started but its number could not be read back.
    async fn trigger(
        &self,
        job_name: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<TriggeredBuild>;

    /// Observe the current state of a build.
    async fn poll_status(&self, key: &BuildKey) -> Result<StatusSnapshot>;

    /// Fetch console output, optionally only the last `tail` lines.
    async fn fetch_logs(&self, key: &BuildKey, tail: Option<usize>) -> Result<String>;

    /// Best-effort reachability check. Never fails.
    async fn health_check(&self) -> bool;
}
