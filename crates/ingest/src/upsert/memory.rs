use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use bulkload_core::{Batch, StoredProduct};

use super::UpsertEngine;
use crate::error::IngestError;

#[derive(Default)]
struct State {
    rows: HashMap<String, StoredProduct>,
    /// Record count of every successfully applied batch, in order.
    applied: Vec<usize>,
    calls: usize,
    /// 1-based call number that fails instead of applying.
    fail_on_call: Option<usize>,
}

/// In-memory product table with the same upsert semantics as Postgres.
///
/// A batch is applied under a single lock, so readers never see half of it.
#[derive(Default)]
pub struct MemoryProductStore {
    state: Mutex<State>,
    delay: Option<Duration>,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th call to `apply` (1-based) fail without writing anything.
    pub fn fail_on_call(self, n: usize) -> Self {
        self.state.lock().unwrap().fail_on_call = Some(n);
        self
    }

    /// Sleep before every apply. Lets tests observe intermediate progress.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn get(&self, sku: &str) -> Option<StoredProduct> {
        self.state.lock().unwrap().rows.get(sku).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sizes of the batches applied so far.
    pub fn applied_batches(&self) -> Vec<usize> {
        self.state.lock().unwrap().applied.clone()
    }
}

#[async_trait]
impl UpsertEngine for MemoryProductStore {
    async fn apply(&self, batch: &Batch) -> Result<u64, IngestError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.calls += 1;
        if state.fail_on_call == Some(state.calls) {
            return Err(IngestError::Store(format!(
                "injected failure on batch {}",
                state.calls
            )));
        }

        let now = Utc::now();
        for record in &batch.records {
            match state.rows.get_mut(&record.sku) {
                Some(existing) => {
                    existing.name = record.name.clone();
                    existing.description = record.description.clone();
                    existing.is_active = record.is_active;
                    existing.updated_at = Some(now);
                }
                None => {
                    state.rows.insert(
                        record.sku.clone(),
                        StoredProduct {
                            sku: record.sku.clone(),
                            name: record.name.clone(),
                            description: record.description.clone(),
                            is_active: record.is_active,
                            created_at: now,
                            updated_at: None,
                        },
                    );
                }
            }
        }
        state.applied.push(batch.len());
        Ok(batch.source_rows)
    }
}
