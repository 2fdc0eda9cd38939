use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use bulkload_core::Batch;

use super::UpsertEngine;
use crate::error::IngestError;

const UPSERT_SQL: &str = r#"
    WITH input AS (
        SELECT UNNEST($1::text[]) AS sku,
               UNNEST($2::text[]) AS name,
               UNNEST($3::text[]) AS description,
               UNNEST($4::bool[]) AS is_active
    )
    INSERT INTO products (sku, name, description, is_active)
    SELECT sku, name, description, is_active FROM input
    ON CONFLICT (sku) DO UPDATE
    SET name = EXCLUDED.name,
        description = EXCLUDED.description,
        is_active = EXCLUDED.is_active,
        updated_at = now()
"#;

/// Upserts batches into the `products` table, one transaction per batch.
#[derive(Clone)]
pub struct PgUpsertEngine {
    pool: PgPool,
    /// Bound on one batch's transaction, commit included.
    timeout: Duration,
}

impl PgUpsertEngine {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn write(&self, batch: &Batch) -> Result<(), IngestError> {
        let mut skus = Vec::with_capacity(batch.len());
        let mut names = Vec::with_capacity(batch.len());
        let mut descriptions = Vec::with_capacity(batch.len());
        let mut flags = Vec::with_capacity(batch.len());
        for record in &batch.records {
            skus.push(record.sku.as_str());
            names.push(record.name.as_str());
            descriptions.push(record.description.as_deref());
            flags.push(record.is_active);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(UPSERT_SQL)
            .bind(&skus)
            .bind(&names)
            .bind(&descriptions)
            .bind(&flags)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl UpsertEngine for PgUpsertEngine {
    async fn apply(&self, batch: &Batch) -> Result<u64, IngestError> {
        if batch.is_empty() {
            return Ok(batch.source_rows);
        }
        let start = Instant::now();
        // Dropping the future on timeout drops the transaction, which rolls it back.
        tokio::time::timeout(self.timeout, self.write(batch))
            .await
            .map_err(|_| IngestError::StoreTimeout(self.timeout.as_secs()))??;

        debug!(
            records = batch.len(),
            source_rows = batch.source_rows,
            duration_ms = start.elapsed().as_millis() as u64,
            "batch upserted"
        );
        Ok(batch.source_rows)
    }
}
