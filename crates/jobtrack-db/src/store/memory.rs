//! In-memory result store.

use async_trait::async_trait;
use jobtrack_core::{BuildKey, BuildRecord, MergeOutcome};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{ResultStore, StoredBuild};
use crate::{DbError, DbResult};

/// Result store held in process memory.
///
/// A single lock guards every record, which trivially serializes writers per
/// key. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryResultStore {
    records: Mutex<HashMap<BuildKey, BuildRecord>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn upsert(&self, record: BuildRecord) -> DbResult<StoredBuild> {
        let mut records = self.records.lock().await;
        match records.get_mut(&record.key) {
            Some(current) => {
                let outcome = current.merge(record);
                Ok(StoredBuild {
                    record: current.clone(),
                    outcome,
                })
            }
            None => {
                records.insert(record.key.clone(), record.clone());
                Ok(StoredBuild {
                    record,
                    outcome: MergeOutcome::Created,
                })
            }
        }
    }

    async fn get(&self, key: &BuildKey) -> DbResult<BuildRecord> {
        self.records
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {}", key)))
    }

    async fn append_log(&self, key: &BuildKey, text: &str) -> DbResult<bool> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| DbError::NotFound(format!("build {}", key)))?;
        if record.log_blob.is_some() {
            return Ok(false);
        }
        record.log_blob = Some(text.to_string());
        Ok(true)
    }

    async fn health_check(&self) -> bool {
        true
    }
}
