//! Batch upsert into the product store.
//!
//! One [`Batch`] is applied as one atomic operation: every record is
//! inserted, and on a `sku` conflict the mutable columns are overwritten and
//! `updated_at` refreshed. `created_at` is never touched by an update.

mod memory;
mod postgres;

use async_trait::async_trait;

use bulkload_core::Batch;

use crate::error::IngestError;

pub use memory::MemoryProductStore;
pub use postgres::PgUpsertEngine;

#[async_trait]
pub trait UpsertEngine: Send + Sync {
    /// Apply `batch` atomically.
    ///
    /// Returns `batch.source_rows`, the number of input rows the batch
    /// accounts for, whether each record was inserted or updated.
    async fn apply(&self, batch: &Batch) -> Result<u64, IngestError>;
}
