//! Build lifecycle tracker - the state machine per build.
//!
//! `TRIGGERED -> IN_PROGRESS -> {SUCCESS, FAILURE, ABORTED}`. Polls and
//! callbacks both write through the store's forward-only merge, so the order
//! in which they arrive never regresses a build's visible state.

use chrono::{DateTime, Utc};
use jobtrack_core::logs::tail_lines;
use jobtrack_core::{
    BuildKey, BuildRecord, BuildStatus, Error, ExecutionGateway, MergeOutcome, Result,
    StatusSnapshot, TriggeredBuild,
};
use jobtrack_db::ResultStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stored state of a build plus the timing details of the latest poll.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub record: BuildRecord,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_end_at: Option<DateTime<Utc>>,
}

/// Acknowledgement of an ingested callback.
#[derive(Debug, Clone)]
pub struct CallbackReceipt {
    /// The stored record after ingestion.
    pub record: BuildRecord,
    /// The build was already terminal; the callback changed no result.
    pub duplicate: bool,
    /// Console output was fetched and stored by this callback.
    pub log_stored: bool,
}

/// Tracks builds from trigger to terminal outcome.
pub struct BuildLifecycleTracker {
    gateway: Arc<dyn ExecutionGateway>,
    store: Arc<dyn ResultStore>,
}

impl BuildLifecycleTracker {
    pub fn new(gateway: Arc<dyn ExecutionGateway>, store: Arc<dyn ResultStore>) -> Self {
        Self { gateway, store }
    }

    /// Start a build and record it as `TRIGGERED`.
    ///
    /// Gateway failures propagate unchanged and leave no record behind.
    pub async fn trigger(
        &self,
        job_name: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<TriggeredBuild> {
        if job_name.trim().is_empty() {
            return Err(Error::InvalidInput("job_name must not be empty".to_string()));
        }

        let build = self.gateway.trigger(job_name, parameters).await?;
        let key = BuildKey::new(build.job_name.clone(), build.build_number)?;

        if let Err(e) = self
            .store
            .upsert(BuildRecord::triggered(key.clone(), Utc::now()))
            .await
        {
            warn!(build = %key, error = %e, "Build started on engine but could not be recorded");
            return Err(e.into());
        }

        info!(build = %key, gateway = self.gateway.name(), "Build triggered");
        Ok(build)
    }

    /// Poll the engine and fold the result into the stored record.
    ///
    /// Returns the stored record, never the raw poll, so a stale poll cannot
    /// regress a build that already completed.
    pub async fn refresh_status(&self, key: &BuildKey) -> Result<BuildRecord> {
        Ok(self.refresh(key).await?.0)
    }

    /// Like `refresh_status`, also carrying the poll's start and estimated end.
    pub async fn status_view(&self, key: &BuildKey) -> Result<StatusView> {
        let (record, snapshot) = self.refresh(key).await?;
        Ok(StatusView {
            record,
            started_at: snapshot.started_at,
            estimated_end_at: snapshot.estimated_end_at,
        })
    }

    async fn refresh(&self, key: &BuildKey) -> Result<(BuildRecord, StatusSnapshot)> {
        let snapshot = self.gateway.poll_status(key).await?;
        let stored = self
            .store
            .upsert(BuildRecord::from_snapshot(key.clone(), &snapshot, Utc::now()))
            .await?;

        match stored.outcome {
            MergeOutcome::Discarded => debug!(
                build = %key,
                polled = %snapshot.status,
                stored = %stored.record.status,
                "Ignoring stale poll"
            ),
            MergeOutcome::Advanced | MergeOutcome::Created => {
                info!(build = %key, status = %stored.record.status, "Build status changed")
            }
            _ => {}
        }

        Ok((stored.record, snapshot))
    }

    /// Record the terminal outcome pushed by the engine.
    ///
    /// Only `SUCCESS` and `FAILURE` are accepted. A callback for a build that
    /// is already terminal is acknowledged and discarded. Console output is
    /// fetched afterwards whenever the build has no stored log yet, duplicates
    /// included; failing to get it does not fail the callback.
    pub async fn ingest_callback(
        &self,
        key: BuildKey,
        status: &str,
        results: HashMap<String, String>,
    ) -> Result<CallbackReceipt> {
        let status = parse_callback_status(status)?;

        let stored = self
            .store
            .upsert(BuildRecord::completed(
                key.clone(),
                status,
                results,
                Utc::now(),
            )?)
            .await?;

        let duplicate = stored.outcome == MergeOutcome::Discarded;
        if duplicate {
            info!(
                build = %key,
                received = %status,
                stored = %stored.record.status,
                "Discarding duplicate callback"
            );
        } else {
            info!(build = %key, %status, "Recorded build result");
        }

        let log_stored = stored.record.log_blob.is_none() && self.store_logs(&key).await;

        let record = if log_stored {
            self.store.get(&key).await.unwrap_or(stored.record)
        } else {
            stored.record
        };

        Ok(CallbackReceipt {
            record,
            duplicate,
            log_stored,
        })
    }

    /// Fetch and keep the build's console output. Failures are logged only.
    async fn store_logs(&self, key: &BuildKey) -> bool {
        let text = match self.gateway.fetch_logs(key, None).await {
            Ok(text) => text,
            Err(e) => {
                warn!(build = %key, error = %e, "Could not fetch logs for completed build");
                return false;
            }
        };
        match self.store.append_log(key, &text).await {
            Ok(written) => written,
            Err(e) => {
                warn!(build = %key, error = %e, "Could not store logs for completed build");
                false
            }
        }
    }

    /// Read the stored record for a build.
    pub async fn get_result(&self, key: &BuildKey) -> Result<BuildRecord> {
        Ok(self.store.get(key).await?)
    }

    /// Console output for a build, optionally only the last `tail` lines.
    ///
    /// Served live from the engine. When the engine cannot provide it, the
    /// log stored at completion is used instead.
    pub async fn fetch_logs(&self, key: &BuildKey, tail: Option<usize>) -> Result<String> {
        match self.gateway.fetch_logs(key, tail).await {
            Ok(text) => Ok(text),
            Err(err @ (Error::NotFound(_) | Error::FetchFailed(_))) => {
                match self.store.get(key).await {
                    Ok(BuildRecord {
                        log_blob: Some(log),
                        ..
                    }) => {
                        debug!(build = %key, error = %err, "Serving stored log");
                        Ok(match tail {
                            Some(n) => tail_lines(&log, n).to_string(),
                            None => log,
                        })
                    }
                    _ => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    pub async fn engine_healthy(&self) -> bool {
        self.gateway.health_check().await
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.health_check().await
    }
}

fn parse_callback_status(status: &str) -> Result<BuildStatus> {
    match status.parse::<BuildStatus>() {
        Ok(status @ (BuildStatus::Success | BuildStatus::Failure)) => Ok(status),
        Ok(other) => Err(Error::InvalidCallback(format!(
            "callbacks must announce SUCCESS or FAILURE, got {}",
            other
        ))),
        Err(_) => Err(Error::InvalidCallback(format!(
            "unknown status '{}'",
            status
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobtrack_db::MemoryResultStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const CONSOLE: &str = "line 1\nline 2\nline 3\nline 4\nline 5";

    /// Gateway whose responses are scripted per test.
    #[derive(Default)]
    struct ScriptedGateway {
        trigger_number: Option<u64>,
        unresolved: bool,
        polls: Mutex<VecDeque<Result<StatusSnapshot>>>,
        /// Log fetches still to fail before the console becomes available.
        failing_log_fetches: Mutex<usize>,
        log_fetches: Mutex<usize>,
    }

    impl ScriptedGateway {
        fn triggering(build_number: u64) -> Self {
            Self {
                trigger_number: Some(build_number),
                ..Self::default()
            }
        }

        fn poll(self, status: BuildStatus, progress: f64) -> Self {
            self.polls.lock().unwrap().push_back(Ok(StatusSnapshot {
                status,
                progress_percent: progress,
                started_at: Some(Utc::now()),
                estimated_end_at: None,
            }));
            self
        }

        fn poll_err(self, err: Error) -> Self {
            self.polls.lock().unwrap().push_back(Err(err));
            self
        }

        fn without_logs(self) -> Self {
            self.failing_logs(usize::MAX)
        }

        fn failing_logs(self, fetches: usize) -> Self {
            *self.failing_log_fetches.lock().unwrap() = fetches;
            self
        }

        fn log_fetches(&self) -> usize {
            *self.log_fetches.lock().unwrap()
        }
    }

    #[async_trait]
    impl ExecutionGateway for ScriptedGateway {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn trigger(
            &self,
            job_name: &str,
            _parameters: &HashMap<String, String>,
        ) -> Result<TriggeredBuild> {
            if self.unresolved {
                return Err(Error::BuildNumberUnresolved {
                    location: "http://engine/queue/item/x/".to_string(),
                });
            }
            let build_number = self
                .trigger_number
                .ok_or_else(|| Error::TriggerFailed("engine returned 500".to_string()))?;
            Ok(TriggeredBuild {
                job_name: job_name.to_string(),
                build_number,
                engine_url: format!("http://engine/job/{}/{}", job_name, build_number),
            })
        }

        async fn poll_status(&self, _key: &BuildKey) -> Result<StatusSnapshot> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::PollFailed("no scripted poll".to_string())))
        }

        async fn fetch_logs(&self, _key: &BuildKey, tail: Option<usize>) -> Result<String> {
            *self.log_fetches.lock().unwrap() += 1;
            {
                let mut failing = self.failing_log_fetches.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(Error::FetchFailed("connection reset".to_string()));
                }
            }
            Ok(match tail {
                Some(n) => tail_lines(CONSOLE, n).to_string(),
                None => CONSOLE.to_string(),
            })
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn tracker_with(
        gateway: Arc<ScriptedGateway>,
    ) -> (BuildLifecycleTracker, Arc<MemoryResultStore>) {
        let store = Arc::new(MemoryResultStore::new());
        let tracker = BuildLifecycleTracker::new(gateway, store.clone());
        (tracker, store)
    }

    fn tracker(gateway: ScriptedGateway) -> (BuildLifecycleTracker, Arc<MemoryResultStore>) {
        tracker_with(Arc::new(gateway))
    }

    fn key(build_number: u64) -> BuildKey {
        BuildKey::new("scan-a", build_number).unwrap()
    }

    fn risk(level: &str) -> HashMap<String, String> {
        HashMap::from([("risk".to_string(), level.to_string())])
    }

    #[tokio::test]
    async fn test_trigger_creates_triggered_record() {
        let (tracker, store) = tracker(ScriptedGateway::triggering(123));
        let params = HashMap::from([("nexusURL".to_string(), "x".to_string())]);

        let build = tracker.trigger("scan-a", &params).await.unwrap();
        assert_eq!(build.build_number, 123);

        let record = store.get(&key(123)).await.unwrap();
        assert_eq!(record.status, BuildStatus::Triggered);
        assert_eq!(record.key.build_number, 123);
    }

    #[tokio::test]
    async fn test_failed_trigger_creates_no_record() {
        let (tracker, store) = tracker(ScriptedGateway::default());
        let err = tracker.trigger("scan-a", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::TriggerFailed(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unresolved_build_number_propagates() {
        let gateway = ScriptedGateway {
            unresolved: true,
            ..ScriptedGateway::default()
        };
        let (tracker, store) = tracker(gateway);
        let err = tracker.trigger("scan-a", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::BuildNumberUnresolved { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_job_name_rejected() {
        let (tracker, _) = tracker(ScriptedGateway::triggering(1));
        assert!(matches!(
            tracker.trigger(" ", &HashMap::new()).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let gateway = ScriptedGateway::triggering(123)
            .poll(BuildStatus::InProgress, 35.0)
            .poll(BuildStatus::InProgress, 40.0);
        let (tracker, _) = tracker(gateway);

        tracker
            .trigger("scan-a", &HashMap::from([("nexusURL".to_string(), "x".to_string())]))
            .await
            .unwrap();

        let running = tracker.refresh_status(&key(123)).await.unwrap();
        assert_eq!(running.status, BuildStatus::InProgress);
        assert!(running.progress_percent < 100.0);

        let receipt = tracker
            .ingest_callback(key(123), "SUCCESS", risk("low"))
            .await
            .unwrap();
        assert!(!receipt.duplicate);
        assert!(receipt.log_stored);

        let result = tracker.get_result(&key(123)).await.unwrap();
        assert_eq!(result.status, BuildStatus::Success);
        assert_eq!(result.results, risk("low"));
        assert_eq!(result.progress_percent, 100.0);
        assert_eq!(result.log_blob.as_deref(), Some(CONSOLE));

        // A late poll still reporting the build as running changes nothing.
        let after = tracker.refresh_status(&key(123)).await.unwrap();
        assert_eq!(after.status, BuildStatus::Success);
        assert_eq!(after.results, risk("low"));
        assert_eq!(after.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn test_refresh_never_moves_status_backward() {
        let gateway = ScriptedGateway::triggering(5)
            .poll(BuildStatus::InProgress, 60.0)
            .poll(BuildStatus::Aborted, 100.0)
            .poll(BuildStatus::InProgress, 70.0);
        let (tracker, _) = tracker(gateway);
        tracker.trigger("scan-a", &HashMap::new()).await.unwrap();

        let mut last_rank = 0;
        for _ in 0..3 {
            let record = tracker.refresh_status(&key(5)).await.unwrap();
            assert!(record.status.rank() >= last_rank);
            last_rank = record.status.rank();
        }
        let record = tracker.get_result(&key(5)).await.unwrap();
        assert_eq!(record.status, BuildStatus::Aborted);
        assert_eq!(record.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn test_refresh_propagates_engine_faults() {
        let gateway = ScriptedGateway::triggering(5)
            .poll_err(Error::NotFound("build scan-a#5".to_string()))
            .poll_err(Error::PollFailed("timeout".to_string()));
        let (tracker, store) = tracker(gateway);

        assert!(matches!(
            tracker.refresh_status(&key(5)).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            tracker.refresh_status(&key(5)).await,
            Err(Error::PollFailed(_))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_non_terminal_callback_rejected_without_mutation() {
        let (tracker, store) = tracker(ScriptedGateway::triggering(9));
        tracker.trigger("scan-a", &HashMap::new()).await.unwrap();

        for status in ["IN_PROGRESS", "TRIGGERED", "ABORTED", "UNSTABLE", "success"] {
            let err = tracker
                .ingest_callback(key(9), status, risk("low"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidCallback(_)), "status {status}");
        }

        let record = store.get(&key(9)).await.unwrap();
        assert_eq!(record.status, BuildStatus::Triggered);
        assert!(record.results.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_callback_is_discarded() {
        let gateway = Arc::new(ScriptedGateway::triggering(9));
        let (tracker, store) = tracker_with(gateway.clone());
        tracker.trigger("scan-a", &HashMap::new()).await.unwrap();

        let first = tracker
            .ingest_callback(key(9), "SUCCESS", risk("low"))
            .await
            .unwrap();
        let second = tracker
            .ingest_callback(key(9), "SUCCESS", risk("low"))
            .await
            .unwrap();
        assert!(!first.duplicate);
        assert!(first.log_stored);
        assert!(second.duplicate);
        assert!(!second.log_stored);

        let conflicting = tracker
            .ingest_callback(key(9), "FAILURE", risk("high"))
            .await
            .unwrap();
        assert!(conflicting.duplicate);

        // The log was stored by the first callback; duplicates do not refetch it.
        assert_eq!(gateway.log_fetches(), 1);

        assert_eq!(store.len().await, 1);
        let record = store.get(&key(9)).await.unwrap();
        assert_eq!(record.status, BuildStatus::Success);
        assert_eq!(record.results, risk("low"));
    }

    #[tokio::test]
    async fn test_callback_persists_when_logs_unavailable() {
        let (tracker, _) = tracker(ScriptedGateway::triggering(9).without_logs());

        let receipt = tracker
            .ingest_callback(key(9), "FAILURE", risk("high"))
            .await
            .unwrap();
        assert!(!receipt.log_stored);

        let record = tracker.get_result(&key(9)).await.unwrap();
        assert_eq!(record.status, BuildStatus::Failure);
        assert!(record.log_blob.is_none());
    }

    #[tokio::test]
    async fn test_retried_callback_backfills_missing_log() {
        let gateway = Arc::new(ScriptedGateway::triggering(9).failing_logs(1));
        let (tracker, _) = tracker_with(gateway.clone());

        let first = tracker
            .ingest_callback(key(9), "SUCCESS", risk("low"))
            .await
            .unwrap();
        assert!(!first.log_stored);
        assert!(first.record.log_blob.is_none());

        let retry = tracker
            .ingest_callback(key(9), "SUCCESS", risk("low"))
            .await
            .unwrap();
        assert!(retry.duplicate);
        assert!(retry.log_stored);
        assert_eq!(retry.record.log_blob.as_deref(), Some(CONSOLE));
        assert_eq!(gateway.log_fetches(), 2);

        let record = tracker.get_result(&key(9)).await.unwrap();
        assert_eq!(record.status, BuildStatus::Success);
        assert_eq!(record.results, risk("low"));
        assert_eq!(record.log_blob.as_deref(), Some(CONSOLE));
    }

    #[tokio::test]
    async fn test_callback_for_untracked_build_creates_record() {
        let (tracker, _) = tracker(ScriptedGateway::triggering(1));

        let receipt = tracker
            .ingest_callback(key(77), "SUCCESS", risk("low"))
            .await
            .unwrap();
        assert!(!receipt.duplicate);
        assert_eq!(
            tracker.get_result(&key(77)).await.unwrap().status,
            BuildStatus::Success
        );
    }

    #[tokio::test]
    async fn test_get_result_unknown_build() {
        let (tracker, _) = tracker(ScriptedGateway::triggering(1));
        assert!(matches!(
            tracker.get_result(&key(404)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_logs_tail() {
        let (tracker, _) = tracker(ScriptedGateway::triggering(1));
        let text = tracker.fetch_logs(&key(1), Some(2)).await.unwrap();
        assert_eq!(text, "line 4\nline 5");
    }

    #[tokio::test]
    async fn test_fetch_logs_falls_back_to_stored_log() {
        let (tracker, store) = tracker(ScriptedGateway::triggering(1).without_logs());
        let completed =
            BuildRecord::completed(key(3), BuildStatus::Success, risk("low"), Utc::now())
                .unwrap()
                .with_log("a\nb\nc");
        store.upsert(completed).await.unwrap();

        assert_eq!(tracker.fetch_logs(&key(3), Some(1)).await.unwrap(), "c");
        assert!(matches!(
            tracker.fetch_logs(&key(4), None).await,
            Err(Error::FetchFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_poll_and_callback_terminal_wins() {
        let mut gateway = ScriptedGateway::triggering(11);
        for i in 0..16 {
            gateway = gateway.poll(BuildStatus::InProgress, i as f64);
        }
        let (tracker, _) = tracker(gateway);
        let tracker = Arc::new(tracker);
        tracker.trigger("scan-a", &HashMap::new()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..17 {
            let tracker = tracker.clone();
            tasks.push(tokio::spawn(async move {
                if i == 8 {
                    tracker
                        .ingest_callback(key(11), "SUCCESS", risk("low"))
                        .await
                        .map(|r| r.record)
                } else {
                    tracker.refresh_status(&key(11)).await
                }
            }));
        }
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let record = tracker.get_result(&key(11)).await.unwrap();
        assert_eq!(record.status, BuildStatus::Success);
        assert_eq!(record.results, risk("low"));
        assert_eq!(record.progress_percent, 100.0);
    }
}
