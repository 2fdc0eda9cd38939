use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trim and case-fold a primary key. Every comparison and every write goes
/// through this.
pub fn normalize_sku(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// One row of an import file, ready to be upserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Normalized primary key.
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
}

impl ProductRecord {
    pub fn new(sku: &str, name: impl Into<String>) -> Self {
        Self {
            sku: normalize_sku(sku),
            name: name.into(),
            description: None,
            is_active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A product row as the store holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Null until the row is first overwritten.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Records committed to the store in one atomic operation.
///
/// `records` is already deduplicated by `sku`; `source_rows` counts every
/// input row that went into the batch (duplicates and dead-lettered rows
/// included) and is what progress accounting adds up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub records: Vec<ProductRecord>,
    pub source_rows: u64,
    pub rejected: u64,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn skus(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.sku.as_str())
    }
}
