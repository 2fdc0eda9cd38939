//! import-worker — runs queued CSV imports against PostgreSQL.
//!
//! Claims tasks from `import_tasks`, upserts rows into `products`, reports
//! progress to `import_progress` and notifies `webhooks` subscribers when a
//! job completes. Expired progress entries are reaped periodically.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, warn};

use bulkload_core::config::{load_dotenv, Config};
use bulkload_ingest::{
    db, ImportJobRunner, ImportWorker, PgProgressTracker, PgUpsertEngine, ProgressTracker,
    RunnerSettings,
};
use bulkload_notify::{Dispatcher, PgSubscriptionRegistry, WebhookNotifier};
use bulkload_queue::{PgTaskQueue, TaskQueue};

// ── CLI ─────────────────────────────────────────────────────────────

/// Bulk import worker.
#[derive(Parser, Debug)]
#[command(name = "import-worker", version, about)]
struct Cli {
    /// Maximum number of jobs running at once (overrides WORKER_CONCURRENCY).
    #[arg(long)]
    concurrency: Option<usize>,

    /// Shutdown timeout in seconds (overrides WORKER_SHUTDOWN_TIMEOUT_SECS).
    #[arg(long)]
    shutdown_timeout: Option<u64>,

    /// How often expired progress entries are deleted, in seconds.
    #[arg(long, env = "PROGRESS_REAP_INTERVAL_SECS", default_value_t = 600)]
    reap_interval: u64,

    /// Skip running migrations at startup.
    #[arg(long, default_value_t = false)]
    no_migrate: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    load_dotenv();

    let mut config = Config::from_env();
    if let Some(n) = cli.concurrency {
        config.worker.concurrency = n;
    }
    if let Some(secs) = cli.shutdown_timeout {
        config.worker.shutdown_timeout_secs = secs;
    }
    config.validate()?;
    config.log_summary();

    let pool = db::connect(&config.postgres)
        .await
        .context("failed to connect to PostgreSQL")?;
    if !cli.no_migrate {
        db::migrate(&pool).await.context("failed to run migrations")?;
    }

    let progress: Arc<dyn ProgressTracker> = Arc::new(PgProgressTracker::new(
        pool.clone(),
        config.import.progress_ttl(),
    ));
    let queue: Arc<dyn TaskQueue> = Arc::new(PgTaskQueue::new(pool.clone(), config.worker.lease()));
    let notifier = WebhookNotifier::new(config.notify.webhook_timeout())
        .context("failed to build webhook client")?;
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(PgSubscriptionRegistry::new(pool.clone())),
        Arc::new(notifier),
        config.notify.webhook_timeout(),
    ));
    let runner = Arc::new(ImportJobRunner::new(
        Arc::new(PgUpsertEngine::new(pool.clone(), config.import.store_timeout())),
        progress.clone(),
        dispatcher,
        RunnerSettings::from_config(&config.import),
    ));
    let worker = ImportWorker::new(queue, runner, &config.worker);

    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.notify_one();
        });
    }

    let reaper = tokio::spawn(reap_loop(progress, Duration::from_secs(cli.reap_interval)));

    info!("import-worker starting");
    worker.run(shutdown).await?;
    reaper.abort();
    pool.close().await;
    info!("import-worker exited cleanly");
    Ok(())
}

/// Periodically delete expired progress entries.
async fn reap_loop(progress: Arc<dyn ProgressTracker>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    loop {
        ticker.tick().await;
        match progress.reap_expired().await {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "reaped expired progress entries"),
            Err(e) => warn!(error = %e, "progress reap failed"),
        }
    }
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            _ => {
                warn!("failed to register signal handlers, falling back to ctrl_c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
