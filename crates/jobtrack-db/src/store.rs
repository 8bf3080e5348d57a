//! Result store trait and implementations.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use jobtrack_core::{BuildKey, BuildRecord, MergeOutcome};

pub use memory::MemoryResultStore;
pub use postgres::PgResultStore;

use crate::DbResult;

/// A record as stored after a write, and what the write did to it.
#[derive(Debug, Clone)]
pub struct StoredBuild {
    pub record: BuildRecord,
    pub outcome: MergeOutcome,
}

/// Durable store of build records keyed by job name and build number.
///
/// Implementations must apply `upsert` atomically per key: concurrent writers
/// for the same build are serialized so the forward-only merge always sees
/// the latest stored state.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert the record if absent, else merge it into the stored one.
    async fn upsert(&self, record: BuildRecord) -> DbResult<StoredBuild>;

    /// Get the stored record for a build.
    async fn get(&self, key: &BuildKey) -> DbResult<BuildRecord>;

    /// Set the build's log if it has none. Returns whether the log was written.
    async fn append_log(&self, key: &BuildKey, text: &str) -> DbResult<bool>;

    /// Whether the backing storage is reachable.
    async fn health_check(&self) -> bool;
}
