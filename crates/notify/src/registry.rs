//! Subscription lookup.
//!
//! The dispatcher only needs [`SubscriptionRegistry::list_active`]. The
//! Postgres store also carries the create/list/delete operations used by the
//! management CLI.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use bulkload_core::Subscription;

use crate::traits::NotifyError;

/// Read-only view of registered subscribers.
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// Active subscriptions for `event_kind`, ordered by id.
    async fn list_active(&self, event_kind: &str) -> Result<Vec<Subscription>, NotifyError>;
}

// ── PostgreSQL ───────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct WebhookRow {
    id: i64,
    url: String,
    event_type: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<WebhookRow> for Subscription {
    fn from(row: WebhookRow) -> Self {
        Subscription {
            id: row.id,
            target_endpoint: row.url,
            event_kind: row.event_type,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

/// Subscriptions stored in the `webhooks` table.
#[derive(Clone)]
pub struct PgSubscriptionRegistry {
    pool: PgPool,
}

impl PgSubscriptionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a new endpoint for `event_kind`.
    pub async fn create(
        &self,
        url: &str,
        event_kind: &str,
        is_active: bool,
    ) -> Result<Subscription, NotifyError> {
        if url.trim().is_empty() {
            return Err(NotifyError::Config("webhook url must not be empty".into()));
        }
        let row = sqlx::query_as::<_, WebhookRow>(
            "INSERT INTO webhooks (url, event_type, is_active)
             VALUES ($1, $2, $3)
             RETURNING id, url, event_type, is_active, created_at",
        )
        .bind(url.trim())
        .bind(event_kind)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    /// Every subscription, active or not.
    pub async fn list(&self) -> Result<Vec<Subscription>, NotifyError> {
        let rows = sqlx::query_as::<_, WebhookRow>(
            "SELECT id, url, event_type, is_active, created_at FROM webhooks ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    pub async fn delete(&self, id: i64) -> Result<(), NotifyError> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(NotifyError::NotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRegistry for PgSubscriptionRegistry {
    async fn list_active(&self, event_kind: &str) -> Result<Vec<Subscription>, NotifyError> {
        let rows = sqlx::query_as::<_, WebhookRow>(
            "SELECT id, url, event_type, is_active, created_at
             FROM webhooks
             WHERE event_type = $1 AND is_active
             ORDER BY id",
        )
        .bind(event_kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Subscription::from).collect())
    }
}

// ── In-memory ────────────────────────────────────────────────────────

/// Registry held in memory; ids are assigned sequentially from 1.
#[derive(Default)]
pub struct MemorySubscriptionRegistry {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl MemorySubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, url: &str, event_kind: &str, is_active: bool) -> Subscription {
        let mut subs = self.subscriptions.lock().unwrap();
        let id = subs.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        let sub = Subscription {
            id,
            target_endpoint: url.to_string(),
            event_kind: event_kind.to_string(),
            is_active,
            created_at: Utc::now(),
        };
        subs.push(sub.clone());
        sub
    }

    pub fn remove(&self, id: i64) -> bool {
        let mut subs = self.subscriptions.lock().unwrap();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }
}

#[async_trait]
impl SubscriptionRegistry for MemorySubscriptionRegistry {
    async fn list_active(&self, event_kind: &str) -> Result<Vec<Subscription>, NotifyError> {
        let subs = self.subscriptions.lock().unwrap();
        let mut active: Vec<Subscription> =
            subs.iter().filter(|s| s.matches(event_kind)).cloned().collect();
        active.sort_by_key(|s| s.id);
        Ok(active)
    }
}
