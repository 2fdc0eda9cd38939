//! Import job execution.
//!
//! [`ImportJobRunner::run`] drives one job from start to finish:
//! pre-count the staged file, stream batches through the upsert engine,
//! report progress after every batch, then clean up and notify. It holds no
//! state between jobs; everything it touches is injected.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bulkload_core::config::{ImportConfig, MalformedRowPolicy};
use bulkload_core::{Batch, ImportJob, JobId, JobState, NotificationEvent};
use bulkload_notify::{DispatchResult, Dispatcher};

use crate::chunker::{count_records, Chunker};
use crate::error::IngestError;
use crate::progress::{ProgressTracker, ProgressUpdate};
use crate::upsert::UpsertEngine;

// ── Settings & report ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub batch_size: usize,
    pub malformed_rows: MalformedRowPolicy,
}

impl RunnerSettings {
    pub fn from_config(config: &ImportConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            malformed_rows: config.malformed_rows,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&ImportConfig::default())
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub state: JobState,
    pub total_records: u64,
    pub processed_records: u64,
    pub batches: u64,
    pub rejected_rows: u64,
    pub notifications: Vec<DispatchResult>,
    pub duration_ms: u64,
}

/// Running counters for one job.
#[derive(Debug, Default)]
struct Tally {
    total: u64,
    processed: u64,
    batches: u64,
    rejected: u64,
    /// Last percent written to the tracker.
    percent: u8,
}

// ── Runner ──────────────────────────────────────────────────────────

pub struct ImportJobRunner {
    upsert: Arc<dyn UpsertEngine>,
    progress: Arc<dyn ProgressTracker>,
    dispatcher: Arc<Dispatcher>,
    settings: RunnerSettings,
}

impl ImportJobRunner {
    pub fn new(
        upsert: Arc<dyn UpsertEngine>,
        progress: Arc<dyn ProgressTracker>,
        dispatcher: Arc<Dispatcher>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            upsert,
            progress,
            dispatcher,
            settings,
        }
    }

    /// Run `job` to completion.
    ///
    /// On error the job is marked Failed at its last reported percent, the
    /// staged file is left in place, and the error is returned. `cancel` is
    /// checked before each batch; a cancelled job keeps its Running progress
    /// so a later attempt can finish it.
    pub async fn run(
        &self,
        job: ImportJob,
        cancel: CancellationToken,
    ) -> Result<JobReport, IngestError> {
        let job_id = job.job_id;
        let start = Instant::now();
        info!(job_id = %job_id, path = %job.input_path.display(), "import job started");

        let mut tally = Tally::default();
        if let Err(e) = self.execute(&job, &cancel, &mut tally).await {
            error!(
                job_id = %job_id,
                kind = e.kind().as_str(),
                error = %e,
                processed = tally.processed,
                total = tally.total,
                "import job failed"
            );
            // An interrupted job is run again from the start, so it stays Running.
            if !matches!(e, IngestError::Cancelled) {
                let failed = ProgressUpdate::failed(tally.percent, tally.processed, tally.total);
                if let Err(pe) = self.progress.set(job_id, failed).await {
                    warn!(job_id = %job_id, error = %pe, "failed to record job failure");
                }
            }
            return Err(e);
        }

        remove_artifact(&job.input_path).await;

        let notifications = if tally.processed > 0 {
            self.dispatcher
                .dispatch_event(&NotificationEvent::import_completed(tally.processed))
                .await
        } else {
            Vec::new()
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            job_id = %job_id,
            total = tally.total,
            processed = tally.processed,
            batches = tally.batches,
            rejected = tally.rejected,
            notified = notifications.iter().filter(|r| r.success).count(),
            duration_ms,
            "import job completed"
        );

        Ok(JobReport {
            job_id,
            state: JobState::Completed,
            total_records: tally.total,
            processed_records: tally.processed,
            batches: tally.batches,
            rejected_rows: tally.rejected,
            notifications,
            duration_ms,
        })
    }

    async fn execute(
        &self,
        job: &ImportJob,
        cancel: &CancellationToken,
        tally: &mut Tally,
    ) -> Result<(), IngestError> {
        let job_id = job.job_id;
        self.progress
            .set(job_id, ProgressUpdate::running(0, 0))
            .await?;

        let path = job.input_path.clone();
        tally.total = tokio::task::spawn_blocking(move || count_records(&path))
            .await
            .map_err(|e| IngestError::Internal(format!("row count task failed: {e}")))??;
        debug!(job_id = %job_id, total = tally.total, "pre-scan finished");

        let (mut batches, reader) = read_batches(job.input_path.clone(), self.settings);

        while let Some(batch) = batches.recv().await {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            let batch = batch?;

            let committed = self.upsert.apply(&batch).await?;
            tally.processed += committed;
            tally.batches += 1;
            tally.rejected += batch.rejected;

            let update = ProgressUpdate::running(tally.processed, tally.total);
            self.progress.set(job_id, update).await?;
            tally.percent = update.percent;

            debug!(
                job_id = %job_id,
                batch = tally.batches,
                records = batch.len(),
                processed = tally.processed,
                percent = update.percent,
                "batch committed"
            );
        }

        reader
            .await
            .map_err(|e| IngestError::Internal(format!("batch reader failed: {e}")))?;

        self.progress
            .set(job_id, ProgressUpdate::completed(tally.processed, tally.total))
            .await?;
        tally.percent = 100;
        Ok(())
    }
}

/// Read `path` on the blocking pool, handing batches over one at a time.
///
/// The reader stops after the first error, or once the receiver is dropped.
fn read_batches(
    path: PathBuf,
    settings: RunnerSettings,
) -> (mpsc::Receiver<Result<Batch, IngestError>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1);
    let reader = tokio::task::spawn_blocking(move || {
        let chunker = match Chunker::open(&path, settings.batch_size, settings.malformed_rows) {
            Ok(chunker) => chunker,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        for batch in chunker {
            let failed = batch.is_err();
            if tx.blocking_send(batch).is_err() || failed {
                return;
            }
        }
    });
    (rx, reader)
}

async fn remove_artifact(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove staged file");
    }
}

/// Staging location for a job's input file.
pub fn staged_path(upload_dir: &Path, job_id: JobId) -> PathBuf {
    upload_dir.join(format!("{job_id}.csv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{MemoryProgressTracker, ProgressReading};
    use crate::upsert::MemoryProductStore;
    use bulkload_notify::MemorySubscriptionRegistry;
    use bulkload_notify::WebhookNotifier;
    use std::io::Write;
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryProductStore>,
        progress: Arc<MemoryProgressTracker>,
        runner: ImportJobRunner,
        dir: tempfile::TempDir,
    }

    fn harness(store: MemoryProductStore, batch_size: usize) -> Harness {
        let store = Arc::new(store);
        let progress = Arc::new(MemoryProgressTracker::default());
        let timeout = Duration::from_secs(1);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(MemorySubscriptionRegistry::new()),
            Arc::new(WebhookNotifier::new(timeout).unwrap()),
            timeout,
        ));
        let runner = ImportJobRunner::new(
            store.clone(),
            progress.clone(),
            dispatcher,
            RunnerSettings {
                batch_size,
                malformed_rows: MalformedRowPolicy::Fail,
            },
        );
        Harness {
            store,
            progress,
            runner,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn stage(h: &Harness, body: &str) -> ImportJob {
        let job_id = JobId::new();
        let path = staged_path(h.dir.path(), job_id);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        ImportJob::new(job_id, path)
    }

    fn rows(n: usize) -> String {
        let mut s = String::from("sku,name,description\n");
        for i in 0..n {
            s.push_str(&format!("sku-{i},item {i},\n"));
        }
        s
    }

    #[tokio::test]
    async fn successful_run_reports_and_cleans_up() {
        let h = harness(MemoryProductStore::new(), 1000);
        let job = stage(&h, &rows(2500));
        let path = job.input_path.clone();

        let report = h.runner.run(job.clone(), CancellationToken::new()).await.unwrap();
        assert_eq!(report.state, JobState::Completed);
        assert_eq!(report.total_records, 2500);
        assert_eq!(report.processed_records, 2500);
        assert_eq!(report.batches, 3);
        assert!(report.notifications.is_empty(), "no subscribers registered");

        assert_eq!(h.store.applied_batches(), vec![1000, 1000, 500]);
        let history = h.progress.history(job.job_id);
        assert!(history.contains(&40));
        assert!(history.contains(&80));
        assert_eq!(history.last(), Some(&100));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn exact_multiple_still_reaches_100() {
        let h = harness(MemoryProductStore::new(), 500);
        let job = stage(&h, &rows(1000));
        h.runner.run(job.clone(), CancellationToken::new()).await.unwrap();
        let reading = h.progress.get(job.job_id).await.unwrap();
        assert_eq!(reading.percent(), 100);
        assert_eq!(reading.state(), Some(JobState::Completed));
    }

    #[tokio::test]
    async fn empty_file_completes_without_batches() {
        let h = harness(MemoryProductStore::new(), 1000);
        let job = stage(&h, "sku,name,description\n");
        let report = h.runner.run(job.clone(), CancellationToken::new()).await.unwrap();
        assert_eq!(report.total_records, 0);
        assert_eq!(report.batches, 0);
        assert!(h.store.applied_batches().is_empty());
        assert_eq!(h.progress.get(job.job_id).await.unwrap().percent(), 100);
    }

    #[tokio::test]
    async fn store_failure_marks_failed_and_keeps_file() {
        let h = harness(MemoryProductStore::new().fail_on_call(2), 10);
        let job = stage(&h, &rows(25));

        let err = h.runner.run(job.clone(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Store(_)));
        assert!(job.input_path.exists());

        match h.progress.get(job.job_id).await.unwrap() {
            ProgressReading::Known(s) => {
                assert_eq!(s.state, JobState::Failed);
                assert_eq!(s.percent, 40);
                assert_eq!(s.processed, 10);
            }
            ProgressReading::Unknown => panic!("failed job should still be visible"),
        }
    }

    #[tokio::test]
    async fn malformed_row_fails_whole_job() {
        let h = harness(MemoryProductStore::new(), 10);
        let job = stage(&h, "sku,name,description\na,ok,\nb\n");
        let err = h.runner.run(job.clone(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingField { line: 3, .. }));
        assert!(h.store.is_empty());
        assert!(job.input_path.exists());
    }

    #[tokio::test]
    async fn cancelled_job_stops_before_next_batch() {
        let h = harness(MemoryProductStore::new(), 10);
        let job = stage(&h, &rows(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h.runner.run(job.clone(), cancel).await.unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
        assert!(h.store.applied_batches().is_empty());
        assert_eq!(
            h.progress.get(job.job_id).await.unwrap().state(),
            Some(JobState::Running)
        );
        assert!(job.input_path.exists());

        let report = h.runner.run(job.clone(), CancellationToken::new()).await.unwrap();
        assert_eq!(report.processed_records, 30);
        assert_eq!(h.progress.get(job.job_id).await.unwrap().percent(), 100);
    }

    #[tokio::test]
    async fn batch_reader_stops_after_first_error() {
        let h = harness(MemoryProductStore::new(), 2);
        let job = stage(&h, "sku,name,description\na,1,\nb,2,\nc\nd,4,\n");
        let settings = RunnerSettings {
            batch_size: 2,
            malformed_rows: MalformedRowPolicy::Fail,
        };

        let (mut batches, reader) = read_batches(job.input_path, settings);
        assert_eq!(batches.recv().await.unwrap().unwrap().len(), 2);
        assert!(matches!(
            batches.recv().await.unwrap(),
            Err(IngestError::MissingField { line: 4, .. })
        ));
        assert!(batches.recv().await.is_none());
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn batch_reader_ends_when_receiver_is_dropped() {
        let h = harness(MemoryProductStore::new(), 10);
        let job = stage(&h, &rows(1000));
        let settings = RunnerSettings {
            batch_size: 10,
            malformed_rows: MalformedRowPolicy::Fail,
        };

        let (mut batches, reader) = read_batches(job.input_path, settings);
        assert_eq!(batches.recv().await.unwrap().unwrap().len(), 10);
        drop(batches);
        tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader kept running")
            .unwrap();
    }
}
