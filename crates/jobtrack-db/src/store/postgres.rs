//! PostgreSQL result store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobtrack_core::{BuildKey, BuildRecord, BuildStatus, MergeOutcome};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::debug;

use super::{ResultStore, StoredBuild};
use crate::{DbError, DbResult};

/// A build record row, joined with its log.
#[derive(Debug, sqlx::FromRow)]
struct BuildRow {
    job_name: String,
    build_number: i64,
    status: String,
    progress_percent: f64,
    results: Json<HashMap<String, String>>,
    updated_at: DateTime<Utc>,
    log_content: Option<String>,
}

impl BuildRow {
    fn into_record(self) -> DbResult<BuildRecord> {
        let build_number = u64::try_from(self.build_number).map_err(|_| {
            DbError::Corrupt(format!(
                "build number {} for {}",
                self.build_number, self.job_name
            ))
        })?;
        let status: BuildStatus = self.status.parse().map_err(|_| {
            DbError::Corrupt(format!(
                "status '{}' for {}#{}",
                self.status, self.job_name, build_number
            ))
        })?;
        Ok(BuildRecord {
            key: BuildKey {
                job_name: self.job_name,
                build_number,
            },
            status,
            progress_percent: self.progress_percent,
            results: self.results.0,
            log_blob: self.log_content,
            updated_at: self.updated_at,
        })
    }
}

fn build_number_param(key: &BuildKey) -> DbResult<i64> {
    i64::try_from(key.build_number)
        .map_err(|_| DbError::Corrupt(format!("build number out of range for {}", key)))
}

const SELECT_BUILD: &str = r#"
    SELECT r.job_name, r.build_number, r.status, r.progress_percent, r.results,
           r.updated_at, l.content AS log_content
    FROM build_records r
    LEFT JOIN build_logs l
        ON l.job_name = r.job_name AND l.build_number = r.build_number
    WHERE r.job_name = $1 AND r.build_number = $2
"#;

/// PostgreSQL implementation of ResultStore.
///
/// Each upsert runs in one transaction that locks the build's row, so
/// concurrent pollers and callbacks for the same build are serialized.
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_log(
        tx: &mut Transaction<'_, Postgres>,
        key: &BuildKey,
        build_number: i64,
        text: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO build_logs (job_name, build_number, content, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (job_name, build_number) DO NOTHING
            "#,
        )
        .bind(&key.job_name)
        .bind(build_number)
        .bind(text)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn upsert(&self, mut record: BuildRecord) -> DbResult<StoredBuild> {
        let build_number = build_number_param(&record.key)?;
        let key = record.key.clone();
        let log = record.log_blob.take();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO build_records
                (job_name, build_number, status, progress_percent, results, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), $6)
            ON CONFLICT (job_name, build_number) DO NOTHING
            "#,
        )
        .bind(&key.job_name)
        .bind(build_number)
        .bind(record.status.as_str())
        .bind(record.progress_percent)
        .bind(Json(&record.results))
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let mut outcome = if inserted {
            MergeOutcome::Created
        } else {
            let locking = format!("{} FOR UPDATE OF r", SELECT_BUILD);
            let current = sqlx::query_as::<_, BuildRow>(&locking)
                .bind(&key.job_name)
                .bind(build_number)
                .fetch_one(&mut *tx)
                .await?;
            let mut current = current.into_record()?;
            // Logs live in their own table and are handled below.
            current.log_blob = None;
            let outcome = current.merge(record);

            if outcome.is_mutation() {
                sqlx::query(
                    r#"
                    UPDATE build_records
                    SET status = $3, progress_percent = $4, results = $5, updated_at = $6
                    WHERE job_name = $1 AND build_number = $2
                    "#,
                )
                .bind(&key.job_name)
                .bind(build_number)
                .bind(current.status.as_str())
                .bind(current.progress_percent)
                .bind(Json(&current.results))
                .bind(current.updated_at)
                .execute(&mut *tx)
                .await?;
            }
            outcome
        };

        if let Some(log) = log {
            let written = Self::insert_log(&mut tx, &key, build_number, &log).await?;
            if written && !outcome.is_mutation() {
                outcome = MergeOutcome::Backfilled;
            }
        }

        let stored = sqlx::query_as::<_, BuildRow>(SELECT_BUILD)
            .bind(&key.job_name)
            .bind(build_number)
            .fetch_one(&mut *tx)
            .await?
            .into_record()?;

        tx.commit().await?;
        debug!(build = %key, ?outcome, status = %stored.status, "Upserted build record");

        Ok(StoredBuild {
            record: stored,
            outcome,
        })
    }

    async fn get(&self, key: &BuildKey) -> DbResult<BuildRecord> {
        let build_number = build_number_param(key)?;
        sqlx::query_as::<_, BuildRow>(SELECT_BUILD)
            .bind(&key.job_name)
            .bind(build_number)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {}", key)))?
            .into_record()
    }

    async fn append_log(&self, key: &BuildKey, text: &str) -> DbResult<bool> {
        let build_number = build_number_param(key)?;
        let mut tx = self.pool.begin().await?;

        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM build_records WHERE job_name = $1 AND build_number = $2",
        )
        .bind(&key.job_name)
        .bind(build_number)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Err(DbError::NotFound(format!("build {}", key)));
        }

        let written = Self::insert_log(&mut tx, key, build_number, text).await?;
        tx.commit().await?;
        Ok(written)
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
