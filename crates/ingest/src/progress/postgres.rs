use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use bulkload_core::{JobId, JobState};

use super::{ProgressReading, ProgressSnapshot, ProgressTracker, ProgressUpdate};
use crate::error::IngestError;

/// Upsert that keeps percent/processed monotonic and leaves terminal rows alone.
const SET_SQL: &str = "INSERT INTO import_progress
         (job_id, percent, state, processed, total, updated_at, expires_at)
     VALUES ($1, $2, $3, $4, $5, now(), now() + make_interval(secs => $6))
     ON CONFLICT (job_id) DO UPDATE
     SET percent = GREATEST(import_progress.percent, EXCLUDED.percent),
         state = EXCLUDED.state,
         processed = GREATEST(import_progress.processed, EXCLUDED.processed),
         total = EXCLUDED.total,
         updated_at = now(),
         expires_at = EXCLUDED.expires_at
     WHERE (import_progress.state = 'pending'
            AND EXCLUDED.state IN ('pending', 'running', 'failed'))
        OR (import_progress.state = 'running'
            AND EXCLUDED.state IN ('running', 'completed', 'failed'))";

#[derive(Debug, sqlx::FromRow)]
struct ProgressRow {
    job_id: Uuid,
    percent: i16,
    state: String,
    processed: i64,
    total: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProgressRow> for ProgressSnapshot {
    type Error = IngestError;

    fn try_from(row: ProgressRow) -> Result<Self, Self::Error> {
        Ok(ProgressSnapshot {
            job_id: JobId(row.job_id),
            percent: row.percent.clamp(0, 100) as u8,
            state: row.state.parse::<JobState>()?,
            processed: row.processed.max(0) as u64,
            total: row.total.max(0) as u64,
            updated_at: row.updated_at,
        })
    }
}

/// Progress kept in the `import_progress` table, readable from any process.
#[derive(Clone)]
pub struct PgProgressTracker {
    pool: PgPool,
    ttl: Duration,
}

impl PgProgressTracker {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }
}

#[async_trait]
impl ProgressTracker for PgProgressTracker {
    async fn set(&self, job_id: JobId, update: ProgressUpdate) -> Result<(), IngestError> {
        let result = sqlx::query(SET_SQL)
            .bind(job_id.as_uuid())
            .bind(update.percent.min(100) as i16)
            .bind(update.state.as_str())
            .bind(update.processed as i64)
            .bind(update.total as i64)
            .bind(self.ttl.as_secs_f64())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            tracing::debug!(job_id = %job_id, "ignoring progress update for finished job");
        }
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<ProgressReading, IngestError> {
        let row = sqlx::query_as::<_, ProgressRow>(
            "SELECT job_id, percent, state, processed, total, updated_at
             FROM import_progress
             WHERE job_id = $1 AND expires_at > now()",
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(ProgressReading::Known(row.try_into()?)),
            None => Ok(ProgressReading::Unknown),
        }
    }

    async fn delete(&self, job_id: JobId) -> Result<(), IngestError> {
        sqlx::query("DELETE FROM import_progress WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reap_expired(&self) -> Result<u64, IngestError> {
        let result = sqlx::query("DELETE FROM import_progress WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
