//! In-process task queue.
//!
//! Same claim/lease semantics as [`PgTaskQueue`](crate::PgTaskQueue) but
//! held in memory, for tests and single-process setups.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use bulkload_core::JobId;

use crate::consumer::{ImportTask, QueueHealth, TaskHandle, TaskQueue, TaskStatus};
use crate::error::QueueError;

struct Entry {
    task: ImportTask,
    status: TaskStatus,
    locked_at: Option<Instant>,
    last_error: Option<String>,
}

pub struct MemoryTaskQueue {
    entries: Mutex<Vec<Entry>>,
    lease: Duration,
}

impl MemoryTaskQueue {
    pub fn new(lease: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            lease,
        }
    }

    /// Status of a task, if known.
    pub fn status(&self, task_id: Uuid) -> Option<TaskStatus> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|e| e.task.task_id == task_id)
            .map(|e| e.status)
    }

    /// Error recorded by `fail`, if any.
    pub fn last_error(&self, task_id: Uuid) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|e| e.task.task_id == task_id)
            .and_then(|e| e.last_error.clone())
    }

    fn finish(
        &self,
        task_id: Uuid,
        attempt: u32,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = held(&mut entries, task_id, attempt)?;
        entry.status = status;
        entry.locked_at = None;
        entry.last_error = error.map(str::to_string);
        Ok(())
    }
}

/// The entry for `task_id`, if `attempt` is its current running claim.
fn held(entries: &mut [Entry], task_id: Uuid, attempt: u32) -> Result<&mut Entry, QueueError> {
    let entry = entries
        .iter_mut()
        .find(|e| e.task.task_id == task_id)
        .ok_or(QueueError::NotFound(task_id))?;
    if entry.status != TaskStatus::Running || entry.task.attempt != attempt {
        return Err(QueueError::LeaseLost { task_id, attempt });
    }
    Ok(entry)
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(900))
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, job_id: JobId, input_path: PathBuf) -> Result<TaskHandle, QueueError> {
        let task = ImportTask {
            task_id: Uuid::new_v4(),
            job_id,
            input_path,
            enqueued_at: Utc::now(),
            attempt: 0,
        };
        let handle = TaskHandle {
            task_id: task.task_id,
            job_id,
        };
        self.entries.lock().unwrap().push(Entry {
            task,
            status: TaskStatus::Queued,
            locked_at: None,
            last_error: None,
        });
        debug!(job_id = %job_id, task_id = %handle.task_id, "task enqueued");
        Ok(handle)
    }

    async fn claim(&self, max: usize) -> Result<Vec<ImportTask>, QueueError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let mut claimed = Vec::new();

        for entry in entries.iter_mut() {
            if claimed.len() >= max {
                break;
            }
            let lease_expired = entry.status == TaskStatus::Running
                && entry
                    .locked_at
                    .is_some_and(|at| now.duration_since(at) >= self.lease);
            if entry.status == TaskStatus::Queued || lease_expired {
                entry.status = TaskStatus::Running;
                entry.locked_at = Some(now);
                entry.task.attempt += 1;
                claimed.push(entry.task.clone());
            }
        }

        Ok(claimed)
    }

    async fn renew(&self, task_id: Uuid, attempt: u32) -> Result<bool, QueueError> {
        let mut entries = self.entries.lock().unwrap();
        match held(&mut entries, task_id, attempt) {
            Ok(entry) => {
                entry.locked_at = Some(Instant::now());
                Ok(true)
            }
            Err(QueueError::LeaseLost { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ack(&self, task_id: Uuid, attempt: u32) -> Result<(), QueueError> {
        self.finish(task_id, attempt, TaskStatus::Done, None)
    }

    async fn fail(&self, task_id: Uuid, attempt: u32, error: &str) -> Result<(), QueueError> {
        self.finish(task_id, attempt, TaskStatus::Failed, Some(error))
    }

    async fn release(&self, task_id: Uuid, attempt: u32) -> Result<(), QueueError> {
        self.finish(task_id, attempt, TaskStatus::Queued, None)
    }

    async fn health(&self) -> Result<QueueHealth, QueueError> {
        let entries = self.entries.lock().unwrap();
        let count = |s: TaskStatus| entries.iter().filter(|e| e.status == s).count() as u64;
        Ok(QueueHealth {
            queued: count(TaskStatus::Queued),
            running: count(TaskStatus::Running),
            failed: count(TaskStatus::Failed),
            provider: "memory".to_string(),
        })
    }
}
