//! Build identity, lifecycle status and the persisted build record.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::gateway::StatusSnapshot;
use crate::{Error, Result};

/// Identity of one build: the job name plus the engine-assigned build number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{job_name}#{build_number}")]
pub struct BuildKey {
    pub job_name: String,
    pub build_number: u64,
}

impl BuildKey {
    /// Create a key, rejecting an empty job name or a zero build number.
    pub fn new(job_name: impl Into<String>, build_number: u64) -> Result<Self> {
        let job_name = job_name.into();
        if job_name.trim().is_empty() {
            return Err(Error::InvalidInput("job_name must not be empty".to_string()));
        }
        if build_number == 0 {
            return Err(Error::InvalidInput(
                "build_number must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            job_name,
            build_number,
        })
    }
}

/// Lifecycle status of a build.
///
/// Ordering is `Triggered < InProgress < {Success, Failure, Aborted}`; the
/// three terminal states share a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Triggered,
    InProgress,
    Success,
    Failure,
    Aborted,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failure | BuildStatus::Aborted
        )
    }

    /// Position along the lifecycle ordering.
    pub fn rank(&self) -> u8 {
        match self {
            BuildStatus::Triggered => 0,
            BuildStatus::InProgress => 1,
            BuildStatus::Success | BuildStatus::Failure | BuildStatus::Aborted => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Triggered => "TRIGGERED",
            BuildStatus::InProgress => "IN_PROGRESS",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TRIGGERED" => Ok(BuildStatus::Triggered),
            "IN_PROGRESS" => Ok(BuildStatus::InProgress),
            "SUCCESS" => Ok(BuildStatus::Success),
            "FAILURE" => Ok(BuildStatus::Failure),
            "ABORTED" => Ok(BuildStatus::Aborted),
            other => Err(Error::InvalidInput(format!("unknown build status '{}'", other))),
        }
    }
}

/// What a merge did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No record existed; the incoming one was stored as-is.
    Created,
    /// Status moved forward.
    Advanced,
    /// Same active status, progress moved forward.
    Refreshed,
    /// Terminal record gained results or a log it did not have yet.
    Backfilled,
    /// Nothing to change.
    Unchanged,
    /// Incoming write was stale or a duplicate of a terminal record.
    Discarded,
}

impl MergeOutcome {
    /// Whether the stored record differs from what it was before the merge.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            MergeOutcome::Created
                | MergeOutcome::Advanced
                | MergeOutcome::Refreshed
                | MergeOutcome::Backfilled
        )
    }
}

/// The persisted state of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub key: BuildKey,
    pub status: BuildStatus,
    /// In `[0, 100]`; exactly 100 once terminal.
    pub progress_percent: f64,
    /// Set only at terminal states, from a callback.
    pub results: HashMap<String, String>,
    pub log_blob: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl BuildRecord {
    /// A freshly triggered build.
    pub fn triggered(key: BuildKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            status: BuildStatus::Triggered,
            progress_percent: 0.0,
            results: HashMap::new(),
            log_blob: None,
            updated_at: now,
        }
    }

    /// A record reflecting one poll of the engine.
    pub fn from_snapshot(key: BuildKey, snapshot: &StatusSnapshot, now: DateTime<Utc>) -> Self {
        let progress_percent = if snapshot.status.is_terminal() {
            100.0
        } else {
            snapshot.progress_percent.clamp(0.0, 100.0)
        };
        Self {
            key,
            status: snapshot.status,
            progress_percent,
            results: HashMap::new(),
            log_blob: None,
            updated_at: now,
        }
    }

    /// A terminal record carrying callback results.
    ///
    /// Fails with `InvalidInput` when `status` is not terminal.
    pub fn completed(
        key: BuildKey,
        status: BuildStatus,
        results: HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "{} is not a terminal status for {}",
                status, key
            )));
        }
        Ok(Self {
            key,
            status,
            progress_percent: 100.0,
            results,
            log_blob: None,
            updated_at: now,
        })
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log_blob = Some(log.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fold an incoming write into this record using the forward-only rule.
    ///
    /// Status only moves forward along the lifecycle ordering and a terminal
    /// record is immutable, except that an empty log or an empty result map
    /// may be backfilled. Results are only backfilled when the incoming
    /// status matches the stored terminal status.
    pub fn merge(&mut self, incoming: BuildRecord) -> MergeOutcome {
        let BuildRecord {
            status,
            progress_percent,
            results,
            log_blob,
            updated_at,
            ..
        } = incoming;

        let log_backfilled = self.log_blob.is_none() && log_blob.is_some();
        if log_backfilled {
            self.log_blob = log_blob;
        }

        let outcome = if self.status.is_terminal() {
            if self.results.is_empty() && !results.is_empty() && status == self.status {
                self.results = results;
                MergeOutcome::Backfilled
            } else if log_backfilled {
                MergeOutcome::Backfilled
            } else {
                MergeOutcome::Discarded
            }
        } else if status.rank() > self.status.rank() {
            self.status = status;
            if status.is_terminal() {
                self.progress_percent = 100.0;
                self.results = results;
            } else {
                self.progress_percent = self.progress_percent.max(progress_percent.min(100.0));
            }
            MergeOutcome::Advanced
        } else if status.rank() < self.status.rank() {
            if log_backfilled {
                MergeOutcome::Backfilled
            } else {
                MergeOutcome::Discarded
            }
        } else if progress_percent > self.progress_percent {
            self.progress_percent = progress_percent.min(100.0);
            MergeOutcome::Refreshed
        } else if log_backfilled {
            MergeOutcome::Backfilled
        } else {
            MergeOutcome::Unchanged
        };

        if outcome.is_mutation() {
            self.updated_at = self.updated_at.max(updated_at);
        }
        outcome
    }
}
