//! Task queue trait and types.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bulkload_core::{ImportJob, JobId};

use crate::error::QueueError;

/// Where a task is in its queue lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, QueueError> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(QueueError::Parse(format!("unknown task status '{other}'"))),
        }
    }
}

/// Returned to the submitter by `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: Uuid,
    pub job_id: JobId,
}

/// A claimed unit of work: run the import job for `input_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportTask {
    pub task_id: Uuid,
    pub job_id: JobId,
    pub input_path: PathBuf,
    pub enqueued_at: DateTime<Utc>,
    /// How many times this task has been claimed, this claim included.
    pub attempt: u32,
}

impl ImportTask {
    pub fn job(&self) -> ImportJob {
        ImportJob {
            job_id: self.job_id,
            input_path: self.input_path.clone(),
            submitted_at: self.enqueued_at,
        }
    }
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueHealth {
    pub queued: u64,
    pub running: u64,
    pub failed: u64,
    /// Queue provider name (e.g., "postgres", "memory").
    pub provider: String,
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueHealth {{ queued: {}, running: {}, failed: {}, provider: {} }}",
            self.queued, self.running, self.failed, self.provider
        )
    }
}

/// Trait for task queue backends.
///
/// Ordering between distinct tasks is not guaranteed. A task may be
/// delivered more than once if a worker dies holding its lease, so workers
/// `renew` the lease while a task runs.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Add a job to the queue. Never waits for the job to run.
    async fn enqueue(&self, job_id: JobId, input_path: PathBuf) -> Result<TaskHandle, QueueError>;

    /// Claim up to `max` runnable tasks, marking them running.
    ///
    /// Returns an empty vec if nothing is available.
    async fn claim(&self, max: usize) -> Result<Vec<ImportTask>, QueueError>;

    /// Extend the lease of a running task.
    ///
    /// Returns `false` when `attempt` no longer holds the task, i.e. the
    /// lease ran out and the task was claimed again.
    async fn renew(&self, task_id: Uuid, attempt: u32) -> Result<bool, QueueError>;

    /// Mark a claimed task as finished successfully.
    ///
    /// Like `fail` and `release`, only the current attempt may settle a
    /// task; a stale attempt gets [`QueueError::LeaseLost`].
    async fn ack(&self, task_id: Uuid, attempt: u32) -> Result<(), QueueError>;

    /// Mark a claimed task as failed. Failed tasks are not retried.
    async fn fail(&self, task_id: Uuid, attempt: u32, error: &str) -> Result<(), QueueError>;

    /// Put a claimed task back in the queue, e.g. when its worker shuts down.
    async fn release(&self, task_id: Uuid, attempt: u32) -> Result<(), QueueError>;

    /// Current queue depth by status.
    async fn health(&self) -> Result<QueueHealth, QueueError>;
}
