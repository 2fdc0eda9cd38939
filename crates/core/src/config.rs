use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub import: ImportConfig,
    pub worker: WorkerConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `BULKLOAD_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("BULKLOAD_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            import: ImportConfig::from_env_profiled(p),
            worker: WorkerConfig::from_env_profiled(p),
            notify: NotifyConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.import.batch_size == 0 {
            return Err(CoreError::Config("IMPORT_BATCH_SIZE must be at least 1".into()));
        }
        if self.worker.concurrency == 0 {
            return Err(CoreError::Config("WORKER_CONCURRENCY must be at least 1".into()));
        }
        if self.notify.webhook_timeout_secs == 0 {
            return Err(CoreError::Config("WEBHOOK_TIMEOUT_SECS must be at least 1".into()));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  import:      upload_dir={}, batch_size={}, malformed_rows={}",
            self.import.upload_dir.display(),
            self.import.batch_size,
            self.import.malformed_rows.as_str()
        );
        tracing::info!(
            "  worker:      concurrency={}, poll_interval_ms={}",
            self.worker.concurrency,
            self.worker.poll_interval_ms
        );
        tracing::info!("  notify:      timeout_secs={}", self.notify.webhook_timeout_secs);
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "import": {
                "upload_dir": self.import.upload_dir,
                "batch_size": self.import.batch_size,
                "store_timeout_secs": self.import.store_timeout_secs,
                "progress_ttl_secs": self.import.progress_ttl_secs,
                "malformed_rows": self.import.malformed_rows.as_str(),
            },
            "worker": {
                "concurrency": self.worker.concurrency,
                "poll_interval_ms": self.worker.poll_interval_ms,
                "lease_secs": self.worker.lease_secs,
            },
            "notify": { "webhook_timeout_secs": self.notify.webhook_timeout_secs },
        })
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection URL; takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "DATABASE_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "bulkload"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    /// URL to hand to the connection pool.
    pub fn database_url(&self) -> String {
        self.url.clone().unwrap_or_else(|| self.connection_string())
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}

// ── Import pipeline ───────────────────────────────────────────

/// What the chunker does with a row that lacks a required value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRowPolicy {
    /// Abort the whole job on the first malformed row.
    #[default]
    Fail,
    /// Dead-letter the row and keep going.
    Skip,
}

impl MalformedRowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MalformedRowPolicy::Fail => "fail",
            MalformedRowPolicy::Skip => "skip",
        }
    }

    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "skip" | "dead_letter" | "dead-letter" => MalformedRowPolicy::Skip,
            _ => MalformedRowPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Directory where submitted files are staged until their job completes.
    pub upload_dir: PathBuf,
    pub batch_size: usize,
    pub store_timeout_secs: u64,
    pub progress_ttl_secs: u64,
    pub malformed_rows: MalformedRowPolicy,
}

impl ImportConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            upload_dir: PathBuf::from(profiled_env_or(p, "UPLOAD_DIR", "uploads")),
            batch_size: profiled_env_u32(p, "IMPORT_BATCH_SIZE", 1000) as usize,
            store_timeout_secs: profiled_env_u64(p, "IMPORT_STORE_TIMEOUT_SECS", 30),
            progress_ttl_secs: profiled_env_u64(p, "IMPORT_PROGRESS_TTL_SECS", 86_400),
            malformed_rows: MalformedRowPolicy::parse(&profiled_env_or(
                p,
                "IMPORT_MALFORMED_ROWS",
                "fail",
            )),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn progress_ttl(&self) -> Duration {
        Duration::from_secs(self.progress_ttl_secs)
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            batch_size: 1000,
            store_timeout_secs: 30,
            progress_ttl_secs: 86_400,
            malformed_rows: MalformedRowPolicy::Fail,
        }
    }
}

// ── Worker pool ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of jobs running at once in one worker process.
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    /// A claimed task whose lease is older than this is handed out again.
    pub lease_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            concurrency: profiled_env_u32(p, "WORKER_CONCURRENCY", 4) as usize,
            poll_interval_ms: profiled_env_u64(p, "WORKER_POLL_INTERVAL_MS", 1000),
            lease_secs: profiled_env_u64(p, "WORKER_LEASE_SECS", 900),
            shutdown_timeout_secs: profiled_env_u64(p, "WORKER_SHUTDOWN_TIMEOUT_SECS", 10),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 1000,
            lease_secs: 900,
            shutdown_timeout_secs: 10,
        }
    }
}

// ── Notifications ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhook_timeout_secs: u64,
}

impl NotifyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            webhook_timeout_secs: profiled_env_u64(p, "WEBHOOK_TIMEOUT_SECS", 5),
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { webhook_timeout_secs: 5 }
    }
}
