//! Out-of-band job progress.
//!
//! The worker writes progress after every committed batch; any other process
//! reads it by job id. Both sides get a [`ProgressTracker`] injected, so the
//! store behind it is shared, never process-local in production.
//!
//! Stores enforce two rules on `set`:
//! - the stored percent (and processed count) never goes down
//! - an entry in a terminal state is never overwritten
//!
//! Every `set` refreshes the entry's expiry. Expired entries read as
//! [`ProgressReading::Unknown`] and are removed by `reap_expired`.

mod memory;
mod postgres;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;

use bulkload_core::{percent_complete, JobId, JobState};

use crate::error::IngestError;

pub use memory::MemoryProgressTracker;
pub use postgres::PgProgressTracker;

#[async_trait]
pub trait ProgressTracker: Send + Sync {
    async fn set(&self, job_id: JobId, update: ProgressUpdate) -> Result<(), IngestError>;

    /// Current reading. An unknown or expired job is not an error.
    async fn get(&self, job_id: JobId) -> Result<ProgressReading, IngestError>;

    async fn delete(&self, job_id: JobId) -> Result<(), IngestError>;

    /// Remove expired entries, returning how many were removed.
    async fn reap_expired(&self) -> Result<u64, IngestError>;
}

// ── Values ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub state: JobState,
    pub processed: u64,
    pub total: u64,
}

impl ProgressUpdate {
    /// Submitted, not yet picked up by a worker.
    pub fn pending() -> Self {
        Self {
            percent: 0,
            state: JobState::Pending,
            processed: 0,
            total: 0,
        }
    }

    pub fn running(processed: u64, total: u64) -> Self {
        // 100 is only reported together with a terminal state
        let percent = if total == 0 {
            0
        } else {
            percent_complete(processed, total).min(99)
        };
        Self {
            percent,
            state: JobState::Running,
            processed,
            total,
        }
    }

    pub fn completed(processed: u64, total: u64) -> Self {
        Self {
            percent: 100,
            state: JobState::Completed,
            processed,
            total,
        }
    }

    /// Terminal failure. `percent` is the last value reported while running.
    pub fn failed(percent: u8, processed: u64, total: u64) -> Self {
        Self {
            percent: percent.min(100),
            state: JobState::Failed,
            processed,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub percent: u8,
    pub state: JobState,
    pub processed: u64,
    pub total: u64,
    pub updated_at: DateTime<Utc>,
}

/// Result of a progress lookup.
///
/// `Unknown` covers both "never submitted" and "expired"; it still reads as
/// 0% through [`ProgressReading::percent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressReading {
    Unknown,
    Known(ProgressSnapshot),
}

impl ProgressReading {
    pub fn percent(&self) -> u8 {
        match self {
            ProgressReading::Unknown => 0,
            ProgressReading::Known(s) => s.percent,
        }
    }

    pub fn state(&self) -> Option<JobState> {
        match self {
            ProgressReading::Unknown => None,
            ProgressReading::Known(s) => Some(s.state),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, ProgressReading::Known(_))
    }

    /// True once polling can stop: 100% reached or the job failed.
    pub fn is_finished(&self) -> bool {
        self.percent() >= 100 || self.state() == Some(JobState::Failed)
    }
}

impl fmt::Display for ProgressReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressReading::Unknown => f.write_str("unknown"),
            ProgressReading::Known(s) => write!(f, "{}% ({})", s.percent, s.state),
        }
    }
}

// ── Polling ─────────────────────────────────────────────────────────

/// Poll `job_id` every `interval`, yielding each reading.
///
/// The first reading is taken immediately. The stream ends after the first
/// finished reading (see [`ProgressReading::is_finished`]); an unknown job is
/// polled indefinitely. Lookup errors are logged and read as `Unknown`.
pub fn watch_progress(
    tracker: Arc<dyn ProgressTracker>,
    job_id: JobId,
    interval: Duration,
) -> impl Stream<Item = ProgressReading> {
    stream::unfold(
        (tracker, true, false),
        move |(tracker, first, done)| async move {
            if done {
                return None;
            }
            if !first {
                tokio::time::sleep(interval).await;
            }
            let reading = match tracker.get(job_id).await {
                Ok(reading) => reading,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "progress lookup failed");
                    ProgressReading::Unknown
                }
            };
            let finished = reading.is_finished();
            Some((reading, (tracker, false, finished)))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn running_never_reports_100() {
        assert_eq!(ProgressUpdate::running(1000, 2500).percent, 40);
        assert_eq!(ProgressUpdate::running(2000, 2500).percent, 80);
        assert_eq!(ProgressUpdate::running(2500, 2500).percent, 99);
        assert_eq!(ProgressUpdate::completed(2500, 2500).percent, 100);
        assert_eq!(ProgressUpdate::running(0, 0).percent, 0);
    }

    #[test]
    fn unknown_reads_as_zero() {
        let r = ProgressReading::Unknown;
        assert_eq!(r.percent(), 0);
        assert_eq!(r.state(), None);
        assert!(!r.is_finished());
        assert_eq!(r.to_string(), "unknown");
    }

    #[tokio::test]
    async fn watch_ends_at_completion() {
        let tracker = Arc::new(MemoryProgressTracker::new(Duration::from_secs(60)));
        let job = JobId::new();
        tracker.set(job, ProgressUpdate::running(40, 100)).await.unwrap();

        let writer = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.set(job, ProgressUpdate::running(80, 100)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.set(job, ProgressUpdate::completed(100, 100)).await.unwrap();
        });

        let readings: Vec<u8> = watch_progress(tracker, job, Duration::from_millis(10))
            .map(|r| r.percent())
            .collect()
            .await;
        assert_eq!(readings.first(), Some(&40));
        assert_eq!(readings.last(), Some(&100));
        assert!(readings.contains(&80));
        assert!(readings.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn watch_ends_on_failure() {
        let tracker = Arc::new(MemoryProgressTracker::new(Duration::from_secs(60)));
        let job = JobId::new();
        tracker.set(job, ProgressUpdate::failed(40, 40, 100)).await.unwrap();

        let readings: Vec<ProgressReading> =
            watch_progress(tracker, job, Duration::from_millis(10)).collect().await;
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].state(), Some(JobState::Failed));
    }
}
