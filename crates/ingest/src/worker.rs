//! Worker pool: claims import tasks from the queue and runs them.
//!
//! Up to `concurrency` jobs run at once; batches within one job stay
//! sequential. While a job runs its task lease is renewed every third of
//! the lease, so no other worker picks it up. On shutdown the worker stops
//! claiming, waits up to the shutdown timeout for in-flight jobs, then
//! cancels whatever is left. A cancelled job stops at its next batch
//! boundary and its task goes back to the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bulkload_core::config::WorkerConfig;
use bulkload_queue::{ImportTask, TaskQueue};

use crate::error::IngestError;
use crate::job_runner::ImportJobRunner;

pub struct ImportWorker {
    queue: Arc<dyn TaskQueue>,
    runner: Arc<ImportJobRunner>,
    concurrency: usize,
    poll_interval: Duration,
    lease: Duration,
    shutdown_timeout: Duration,
}

impl ImportWorker {
    pub fn new(queue: Arc<dyn TaskQueue>, runner: Arc<ImportJobRunner>, config: &WorkerConfig) -> Self {
        Self {
            queue,
            runner,
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval(),
            lease: config.lease(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Poll and run tasks until `shutdown` is notified.
    ///
    /// Signal shutdown with `notify_one`, so a signal sent before the loop
    /// starts waiting is not lost.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), IngestError> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let cancel = CancellationToken::new();
        let mut in_flight: JoinSet<()> = JoinSet::new();

        info!(
            concurrency = self.concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "import worker started"
        );

        let stop = shutdown.notified();
        tokio::pin!(stop);
        stop.as_mut().enable();

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "import task panicked");
                }
            }

            let free = permits.available_permits();
            if free > 0 {
                match self.queue.claim(free).await {
                    Ok(tasks) => {
                        for task in tasks {
                            let Ok(permit) = permits.clone().acquire_owned().await else {
                                break;
                            };
                            let queue = self.queue.clone();
                            let runner = self.runner.clone();
                            let token = cancel.child_token();
                            let lease = self.lease;
                            in_flight.spawn(async move {
                                let _permit = permit;
                                execute(queue, runner, task, lease, token).await;
                            });
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to claim import tasks"),
                }
            }

            tokio::select! {
                _ = &mut stop => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(in_flight = in_flight.len(), "import worker stopping");
        let drain = async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "import task panicked");
                }
            }
        };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            warn!(
                remaining = in_flight.len(),
                "shutdown timeout reached, cancelling in-flight imports"
            );
            cancel.cancel();
            while in_flight.join_next().await.is_some() {}
        }
        info!("import worker stopped");
        Ok(())
    }
}

/// Run one claimed task and settle it with the queue.
async fn execute(
    queue: Arc<dyn TaskQueue>,
    runner: Arc<ImportJobRunner>,
    task: ImportTask,
    lease: Duration,
    cancel: CancellationToken,
) {
    debug!(task_id = %task.task_id, job_id = %task.job_id, attempt = task.attempt, "task claimed");

    let renewer = tokio::spawn(keep_lease(queue.clone(), task.clone(), lease, cancel.clone()));
    let outcome = runner.run(task.job(), cancel).await;
    renewer.abort();

    let settled = match outcome {
        Ok(_) => queue.ack(task.task_id, task.attempt).await,
        Err(IngestError::Cancelled) => {
            info!(task_id = %task.task_id, job_id = %task.job_id, "import interrupted, task released");
            queue.release(task.task_id, task.attempt).await
        }
        Err(e) => queue.fail(task.task_id, task.attempt, &e.to_string()).await,
    };
    if let Err(e) = settled {
        warn!(task_id = %task.task_id, error = %e, "failed to settle import task");
    }
}

/// Renew the task lease until aborted. Cancels the job if the lease is lost.
async fn keep_lease(
    queue: Arc<dyn TaskQueue>,
    task: ImportTask,
    lease: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval((lease / 3).max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match queue.renew(task.task_id, task.attempt).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    task_id = %task.task_id,
                    job_id = %task.job_id,
                    attempt = task.attempt,
                    "task lease lost, stopping import"
                );
                cancel.cancel();
                return;
            }
            Err(e) => warn!(task_id = %task.task_id, error = %e, "failed to renew task lease"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_runner::RunnerSettings;
    use crate::progress::{MemoryProgressTracker, ProgressTracker};
    use crate::upsert::MemoryProductStore;
    use bulkload_core::JobId;
    use bulkload_notify::{Dispatcher, MemorySubscriptionRegistry, WebhookNotifier};
    use bulkload_queue::{MemoryTaskQueue, TaskStatus};

    fn config(lease_secs: u64, shutdown_timeout_secs: u64) -> WorkerConfig {
        WorkerConfig {
            concurrency: 2,
            poll_interval_ms: 10,
            lease_secs,
            shutdown_timeout_secs,
        }
    }

    fn worker(
        queue: Arc<MemoryTaskQueue>,
        store: Arc<MemoryProductStore>,
        config: WorkerConfig,
    ) -> ImportWorker {
        let timeout = Duration::from_secs(1);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(MemorySubscriptionRegistry::new()),
            Arc::new(WebhookNotifier::new(timeout).unwrap()),
            timeout,
        ));
        let runner = Arc::new(ImportJobRunner::new(
            store,
            Arc::new(MemoryProgressTracker::default()) as Arc<dyn ProgressTracker>,
            dispatcher,
            RunnerSettings::default(),
        ));
        ImportWorker::new(queue, runner, &config)
    }

    fn rows(n: usize) -> String {
        let mut s = String::from("sku,name,description\n");
        for i in 0..n {
            s.push_str(&format!("sku-{i},item {i},\n"));
        }
        s
    }

    async fn wait_for(queue: &MemoryTaskQueue, task_id: uuid::Uuid, status: TaskStatus) {
        for _ in 0..500 {
            if queue.status(task_id) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached {status:?}");
    }

    #[tokio::test]
    async fn acks_good_jobs_and_fails_bad_ones() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.csv");
        let bad = dir.path().join("bad.csv");
        std::fs::write(&good, "sku,name,description\na,b,c\n").unwrap();
        std::fs::write(&bad, "sku,name\na,b\n").unwrap();

        let queue = Arc::new(MemoryTaskQueue::default());
        let ok = queue.enqueue(JobId::new(), good.clone()).await.unwrap();
        let ko = queue.enqueue(JobId::new(), bad.clone()).await.unwrap();

        let shutdown = Arc::new(Notify::new());
        let w = worker(queue.clone(), Arc::new(MemoryProductStore::new()), config(60, 1));
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { w.run(shutdown).await })
        };

        wait_for(&queue, ok.task_id, TaskStatus::Done).await;
        wait_for(&queue, ko.task_id, TaskStatus::Failed).await;
        assert!(queue
            .last_error(ko.task_id)
            .unwrap()
            .contains("missing required column"));
        assert!(!good.exists());
        assert!(bad.exists());

        shutdown.notify_one();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_before_any_work_returns() {
        let queue = Arc::new(MemoryTaskQueue::default());
        let shutdown = Arc::new(Notify::new());
        shutdown.notify_one();
        worker(queue, Arc::new(MemoryProductStore::new()), config(60, 1))
            .run(shutdown)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn long_job_keeps_its_lease() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.csv");
        std::fs::write(&path, rows(2500)).unwrap();

        let queue = Arc::new(MemoryTaskQueue::new(Duration::from_secs(1)));
        let handle = queue.enqueue(JobId::new(), path.clone()).await.unwrap();
        let store = Arc::new(MemoryProductStore::new().with_delay(Duration::from_millis(600)));

        let shutdown = Arc::new(Notify::new());
        let w = worker(queue.clone(), store.clone(), config(1, 1));
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { w.run(shutdown).await })
        };

        wait_for(&queue, handle.task_id, TaskStatus::Done).await;
        shutdown.notify_one();
        run.await.unwrap().unwrap();

        assert_eq!(store.applied_batches(), vec![1000, 1000, 500]);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn job_cancelled_at_shutdown_goes_back_to_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.csv");
        std::fs::write(&path, rows(2500)).unwrap();

        let queue = Arc::new(MemoryTaskQueue::default());
        let handle = queue.enqueue(JobId::new(), path.clone()).await.unwrap();
        let store = Arc::new(MemoryProductStore::new().with_delay(Duration::from_millis(300)));

        let shutdown = Arc::new(Notify::new());
        let w = worker(queue.clone(), store.clone(), config(60, 0));
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { w.run(shutdown).await })
        };

        wait_for(&queue, handle.task_id, TaskStatus::Running).await;
        shutdown.notify_one();
        run.await.unwrap().unwrap();

        assert_eq!(queue.status(handle.task_id), Some(TaskStatus::Queued));
        assert!(store.applied_batches().len() < 3);
        assert!(path.exists());

        let again = queue.claim(1).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attempt, 2);
    }
}
