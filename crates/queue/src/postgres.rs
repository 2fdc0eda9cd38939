//! PostgreSQL-backed task queue (`import_tasks` table).
//!
//! Workers claim rows with `FOR UPDATE SKIP LOCKED`, so any number of
//! worker processes can poll the same table without blocking each other.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use bulkload_core::JobId;

use crate::consumer::{ImportTask, QueueHealth, TaskHandle, TaskQueue, TaskStatus};
use crate::error::QueueError;

const CLAIM_SQL: &str = "UPDATE import_tasks t
     SET status = 'running', locked_at = now(), attempts = t.attempts + 1
     WHERE t.id IN (
         SELECT id FROM import_tasks
         WHERE status = 'queued'
            OR (status = 'running' AND locked_at < now() - make_interval(secs => $2))
         ORDER BY enqueued_at
         LIMIT $1
         FOR UPDATE SKIP LOCKED
     )
     RETURNING t.id, t.job_id, t.input_path, t.enqueued_at, t.attempts";

/// Settle a task, but only from the attempt that currently holds it.
const FINISH_SQL: &str = "UPDATE import_tasks
     SET status = $3, last_error = $4, locked_at = NULL,
         finished_at = CASE WHEN $5 THEN now() ELSE NULL END
     WHERE id = $1 AND attempts = $2 AND status = 'running'";

const RENEW_SQL: &str = "UPDATE import_tasks SET locked_at = now()
     WHERE id = $1 AND attempts = $2 AND status = 'running'";

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    job_id: Uuid,
    input_path: String,
    enqueued_at: DateTime<Utc>,
    attempts: i32,
}

impl From<TaskRow> for ImportTask {
    fn from(row: TaskRow) -> Self {
        ImportTask {
            task_id: row.id,
            job_id: JobId(row.job_id),
            input_path: PathBuf::from(row.input_path),
            enqueued_at: row.enqueued_at,
            attempt: row.attempts.max(0) as u32,
        }
    }
}

pub struct PgTaskQueue {
    pool: PgPool,
    lease: Duration,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool, lease: Duration) -> Self {
        info!(lease_secs = lease.as_secs(), "postgres task queue initialized");
        Self { pool, lease }
    }

    async fn finish(
        &self,
        task_id: Uuid,
        attempt: u32,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        let finished = status != TaskStatus::Queued;
        let result = sqlx::query(FINISH_SQL)
            .bind(task_id)
            .bind(attempt as i32)
            .bind(status.as_str())
            .bind(error)
            .bind(finished)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost { task_id, attempt });
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, job_id: JobId, input_path: PathBuf) -> Result<TaskHandle, QueueError> {
        let task_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO import_tasks (id, job_id, input_path, status)
             VALUES ($1, $2, $3, 'queued')",
        )
        .bind(task_id)
        .bind(job_id.as_uuid())
        .bind(input_path.to_string_lossy().as_ref())
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job_id, task_id = %task_id, "task enqueued");
        Ok(TaskHandle { task_id, job_id })
    }

    async fn claim(&self, max: usize) -> Result<Vec<ImportTask>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, TaskRow>(CLAIM_SQL)
            .bind(max as i64)
            .bind(self.lease.as_secs_f64())
            .fetch_all(&self.pool)
            .await?;

        if !rows.is_empty() {
            debug!(count = rows.len(), "claimed import tasks");
        }
        Ok(rows.into_iter().map(ImportTask::from).collect())
    }

    async fn renew(&self, task_id: Uuid, attempt: u32) -> Result<bool, QueueError> {
        let result = sqlx::query(RENEW_SQL)
            .bind(task_id)
            .bind(attempt as i32)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ack(&self, task_id: Uuid, attempt: u32) -> Result<(), QueueError> {
        self.finish(task_id, attempt, TaskStatus::Done, None).await
    }

    async fn fail(&self, task_id: Uuid, attempt: u32, error: &str) -> Result<(), QueueError> {
        self.finish(task_id, attempt, TaskStatus::Failed, Some(error)).await
    }

    async fn release(&self, task_id: Uuid, attempt: u32) -> Result<(), QueueError> {
        self.finish(task_id, attempt, TaskStatus::Queued, None).await
    }

    async fn health(&self) -> Result<QueueHealth, QueueError> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM import_tasks
             WHERE status IN ('queued', 'running', 'failed')
             GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut health = QueueHealth {
            provider: "postgres".to_string(),
            ..Default::default()
        };
        for (status, count) in counts {
            let count = count.max(0) as u64;
            match TaskStatus::parse(&status)? {
                TaskStatus::Queued => health.queued = count,
                TaskStatus::Running => health.running = count,
                TaskStatus::Failed => health.failed = count,
                TaskStatus::Done => {}
            }
        }
        Ok(health)
    }
}
