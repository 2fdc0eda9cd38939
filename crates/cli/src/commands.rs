//! Subcommand handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use sqlx::PgPool;

use bulkload_core::{Config, JobId};
use bulkload_ingest::{
    db, watch_progress, ImportSubmitter, PgProgressTracker, ProgressReading, ProgressTracker,
};
use bulkload_notify::PgSubscriptionRegistry;
use bulkload_queue::{PgTaskQueue, TaskQueue};

use crate::cli::{Command, WebhookCommand};

pub async fn run(command: Command, config: &Config, pool: PgPool) -> Result<()> {
    let progress: Arc<dyn ProgressTracker> = Arc::new(PgProgressTracker::new(
        pool.clone(),
        config.import.progress_ttl(),
    ));

    match command {
        Command::Submit { file, follow } => {
            let job_id = submit(&file, config, pool, progress.clone()).await?;
            println!("{job_id}");
            if follow {
                follow_progress(progress, job_id, Duration::from_secs(1)).await;
            }
        }
        Command::Progress {
            job_id,
            follow,
            interval_ms,
        } => {
            if follow {
                follow_progress(progress, job_id, Duration::from_millis(interval_ms)).await;
            } else {
                let reading = progress
                    .get(job_id)
                    .await
                    .context("failed to read progress")?;
                println!("{}", describe(&reading));
            }
        }
        Command::Webhooks { action } => webhooks(action, PgSubscriptionRegistry::new(pool)).await?,
        Command::Queue => {
            let queue = PgTaskQueue::new(pool, config.worker.lease());
            let health = queue.health().await.context("failed to read queue depth")?;
            println!(
                "queued: {}  running: {}  failed: {}",
                health.queued, health.running, health.failed
            );
        }
        Command::Migrate => {
            db::migrate(&pool).await.context("failed to run migrations")?;
            println!("migrations applied");
        }
        Command::Reap => {
            let removed = progress
                .reap_expired()
                .await
                .context("failed to reap progress entries")?;
            println!("removed {removed} expired progress entries");
        }
    }
    Ok(())
}

async fn submit(
    file: &Path,
    config: &Config,
    pool: PgPool,
    progress: Arc<dyn ProgressTracker>,
) -> Result<JobId> {
    let queue = Arc::new(PgTaskQueue::new(pool, config.worker.lease()));
    let submitter = ImportSubmitter::new(queue, progress, config.import.upload_dir.clone());
    submitter
        .submit_file(file)
        .await
        .with_context(|| format!("failed to submit {}", file.display()))
}

async fn follow_progress(progress: Arc<dyn ProgressTracker>, job_id: JobId, interval: Duration) {
    let mut readings = Box::pin(watch_progress(progress, job_id, interval));
    let mut last: Option<String> = None;
    while let Some(reading) = readings.next().await {
        let line = describe(&reading);
        if last.as_deref() != Some(line.as_str()) {
            println!("{line}");
            last = Some(line);
        }
    }
}

/// One-line rendering: `unknown`, or percent with state and counts.
fn describe(reading: &ProgressReading) -> String {
    match reading {
        ProgressReading::Unknown => "unknown".to_string(),
        ProgressReading::Known(s) => format!(
            "{}% {} ({}/{} rows)",
            s.percent, s.state, s.processed, s.total
        ),
    }
}

async fn webhooks(action: WebhookCommand, registry: PgSubscriptionRegistry) -> Result<()> {
    match action {
        WebhookCommand::Add {
            url,
            event_kind,
            inactive,
        } => {
            let sub = registry
                .create(&url, &event_kind, !inactive)
                .await
                .context("failed to add webhook")?;
            println!("{}", sub.id);
        }
        WebhookCommand::List { json } => {
            let subs = registry.list().await.context("failed to list webhooks")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&subs)?);
            } else {
                for sub in subs {
                    println!(
                        "{:>5}  {:<8}  {:<24}  {}",
                        sub.id,
                        if sub.is_active { "active" } else { "inactive" },
                        sub.event_kind,
                        sub.target_endpoint
                    );
                }
            }
        }
        WebhookCommand::Remove { id } => {
            registry
                .delete(id)
                .await
                .with_context(|| format!("failed to remove webhook {id}"))?;
            println!("removed {id}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkload_core::JobState;
    use bulkload_ingest::ProgressSnapshot;
    use chrono::Utc;

    #[test]
    fn describe_readings() {
        assert_eq!(describe(&ProgressReading::Unknown), "unknown");
        let reading = ProgressReading::Known(ProgressSnapshot {
            job_id: JobId::new(),
            percent: 40,
            state: JobState::Running,
            processed: 1000,
            total: 2500,
            updated_at: Utc::now(),
        });
        assert_eq!(describe(&reading), "40% running (1000/2500 rows)");
    }
}
