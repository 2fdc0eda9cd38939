use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use bulkload_core::JobId;

use super::{ProgressReading, ProgressSnapshot, ProgressTracker, ProgressUpdate};
use crate::error::IngestError;

struct Entry {
    snapshot: ProgressSnapshot,
    expires_at: Instant,
}

/// Process-local tracker for tests and single-process setups.
pub struct MemoryProgressTracker {
    entries: Mutex<HashMap<JobId, Entry>>,
    /// Every accepted percent per job, in write order.
    history: Mutex<HashMap<JobId, Vec<u8>>>,
    ttl: Duration,
}

impl MemoryProgressTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Percent values stored for `job_id` so far, oldest first.
    pub fn history(&self, job_id: JobId) -> Vec<u8> {
        self.history
            .lock()
            .unwrap()
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryProgressTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(86_400))
    }
}

#[async_trait]
impl ProgressTracker for MemoryProgressTracker {
    async fn set(&self, job_id: JobId, update: ProgressUpdate) -> Result<(), IngestError> {
        let mut entries = self.entries.lock().unwrap();
        let expires_at = Instant::now() + self.ttl;

        let snapshot = match entries.get(&job_id) {
            Some(existing) if !existing.snapshot.state.can_transition_to(update.state) => {
                tracing::debug!(
                    job_id = %job_id,
                    from = %existing.snapshot.state,
                    to = %update.state,
                    "ignoring progress update that would move job backwards"
                );
                return Ok(());
            }
            Some(existing) => ProgressSnapshot {
                job_id,
                percent: existing.snapshot.percent.max(update.percent),
                state: update.state,
                processed: existing.snapshot.processed.max(update.processed),
                total: update.total,
                updated_at: Utc::now(),
            },
            None => ProgressSnapshot {
                job_id,
                percent: update.percent.min(100),
                state: update.state,
                processed: update.processed,
                total: update.total,
                updated_at: Utc::now(),
            },
        };

        self.history
            .lock()
            .unwrap()
            .entry(job_id)
            .or_default()
            .push(snapshot.percent);
        entries.insert(job_id, Entry { snapshot, expires_at });
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<ProgressReading, IngestError> {
        let entries = self.entries.lock().unwrap();
        Ok(match entries.get(&job_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                ProgressReading::Known(entry.snapshot.clone())
            }
            _ => ProgressReading::Unknown,
        })
    }

    async fn delete(&self, job_id: JobId) -> Result<(), IngestError> {
        self.entries.lock().unwrap().remove(&job_id);
        Ok(())
    }

    async fn reap_expired(&self) -> Result<u64, IngestError> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}
