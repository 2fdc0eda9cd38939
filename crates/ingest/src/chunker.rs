//! CSV batching.
//!
//! Streams product rows from a staged CSV file, normalizes the `sku` key and
//! groups rows into fixed-size batches deduplicated by key. The file is read
//! twice per job: once by [`count_records`] for progress accounting, then by
//! a [`Chunker`] for the real pass.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use tracing::{debug, warn};

use bulkload_core::config::MalformedRowPolicy;
use bulkload_core::{normalize_sku, Batch, ProductRecord};

use crate::error::IngestError;

// ── Column layout ───────────────────────────────────────────────────

/// Positions of the known columns in the header row.
#[derive(Debug, Clone, Copy)]
struct Columns {
    sku: usize,
    name: usize,
    description: usize,
    is_active: Option<usize>,
}

impl Columns {
    fn from_header(header: &StringRecord) -> Result<Self, IngestError> {
        let find = |wanted: &str| {
            header
                .iter()
                .position(|h| h.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case(wanted))
        };
        let require = |wanted: &str| {
            find(wanted).ok_or_else(|| IngestError::MissingColumn(wanted.to_string()))
        };
        Ok(Self {
            sku: require("sku")?,
            name: require("name")?,
            description: require("description")?,
            is_active: find("is_active"),
        })
    }

    fn parse(&self, row: &StringRecord, line: u64) -> Result<ProductRecord, IngestError> {
        let value = |idx: usize, field: &'static str| {
            row.get(idx).ok_or(IngestError::MissingField { line, field })
        };

        let sku = normalize_sku(value(self.sku, "sku")?);
        if sku.is_empty() {
            return Err(IngestError::EmptyKey { line });
        }
        let name = value(self.name, "name")?.to_string();
        let description = value(self.description, "description")?;
        let is_active = self
            .is_active
            .and_then(|idx| row.get(idx))
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        Ok(ProductRecord {
            sku,
            name,
            description: (!description.is_empty()).then(|| description.to_string()),
            is_active,
        })
    }
}

fn reader(path: &Path) -> Result<csv::Reader<File>, IngestError> {
    Ok(ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?)
}

/// Count data rows (header excluded). This is the pre-scan pass.
pub fn count_records(path: &Path) -> Result<u64, IngestError> {
    let mut rdr = reader(path)?;
    let mut record = StringRecord::new();
    let mut count = 0u64;
    while rdr.read_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}

// ── Chunker ─────────────────────────────────────────────────────────

/// Lazy, finite, non-restartable sequence of [`Batch`]es over one file.
///
/// Each batch covers at most `batch_size` input rows. After the first error
/// the iterator is exhausted.
pub struct Chunker {
    rows: StringRecordsIntoIter<File>,
    columns: Columns,
    batch_size: usize,
    policy: MalformedRowPolicy,
    finished: bool,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("columns", &self.columns)
            .field("batch_size", &self.batch_size)
            .field("policy", &self.policy)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Chunker {
    /// Open `path` and validate its header. A missing required column fails
    /// here, before any batch is produced.
    pub fn open(
        path: &Path,
        batch_size: usize,
        policy: MalformedRowPolicy,
    ) -> Result<Self, IngestError> {
        if batch_size == 0 {
            return Err(IngestError::Internal("batch size must be at least 1".into()));
        }
        let mut rdr = reader(path)?;
        let columns = Columns::from_header(rdr.headers()?)?;
        debug!(path = %path.display(), batch_size, policy = policy.as_str(), "chunker opened");
        Ok(Self {
            rows: rdr.into_records(),
            columns,
            batch_size,
            policy,
            finished: false,
        })
    }

    fn next_batch(&mut self) -> Result<Option<Batch>, IngestError> {
        let mut working: Vec<ProductRecord> = Vec::with_capacity(self.batch_size);
        let mut source_rows = 0u64;
        let mut rejected = 0u64;

        while (source_rows as usize) < self.batch_size {
            let Some(row) = self.rows.next() else { break };
            let row = row?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            source_rows += 1;

            match self.columns.parse(&row, line) {
                Ok(record) => working.push(record),
                Err(e) if self.policy == MalformedRowPolicy::Skip => {
                    warn!(line, error = %e, "dead-lettered malformed row");
                    rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if source_rows == 0 {
            return Ok(None);
        }
        Ok(Some(Batch {
            records: dedup_last_wins(working),
            source_rows,
            rejected,
        }))
    }
}

impl Iterator for Chunker {
    type Item = Result<Batch, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Collapse repeated keys: the last record for a key wins and takes the slot
/// of that key's first occurrence.
fn dedup_last_wins(records: Vec<ProductRecord>) -> Vec<ProductRecord> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<ProductRecord> = Vec::with_capacity(records.len());
    for record in records {
        match slots.get(&record.sku) {
            Some(&idx) => out[idx] = record,
            None => {
                slots.insert(record.sku.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(body: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    fn rows(n: usize) -> String {
        let mut s = String::from("sku,name,description,is_active\n");
        for i in 0..n {
            s.push_str(&format!("SKU-{i},Item {i},desc {i},true\n"));
        }
        s
    }

    fn collect(path: &Path, size: usize, policy: MalformedRowPolicy) -> Vec<Batch> {
        Chunker::open(path, size, policy)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn count_excludes_header() {
        let f = csv_file(&rows(2500));
        assert_eq!(count_records(f.path()).unwrap(), 2500);
        let empty = csv_file("sku,name,description\n");
        assert_eq!(count_records(empty.path()).unwrap(), 0);
    }

    #[test]
    fn batches_are_bounded_and_final_one_is_partial() {
        let f = csv_file(&rows(2500));
        let sizes: Vec<usize> = collect(f.path(), 1000, MalformedRowPolicy::Fail)
            .iter()
            .map(|b| b.len())
            .collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[test]
    fn exact_multiple_yields_no_empty_tail() {
        let f = csv_file(&rows(2000));
        let batches = collect(f.path(), 1000, MalformedRowPolicy::Fail);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 1000));
    }

    #[test]
    fn header_only_file_yields_nothing() {
        let f = csv_file("sku,name,description\n");
        assert!(collect(f.path(), 10, MalformedRowPolicy::Fail).is_empty());
    }

    #[test]
    fn keys_are_normalized() {
        let f = csv_file("sku,name,description\n  AbC ,Widget,\n");
        let batch = &collect(f.path(), 10, MalformedRowPolicy::Fail)[0];
        assert_eq!(batch.records[0].sku, "abc");
        assert_eq!(batch.records[0].description, None);
        assert!(batch.records[0].is_active, "missing is_active column means active");
    }

    #[test]
    fn duplicate_keys_last_wins_in_first_position() {
        let f = csv_file(
            "sku,name,description,is_active\n\
             A,first,d1,true\n\
             B,bee,d2,true\n\
             a,second,d3,FALSE\n",
        );
        let batch = &collect(f.path(), 10, MalformedRowPolicy::Fail)[0];
        assert_eq!(batch.source_rows, 3);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.skus().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(batch.records[0].name, "second");
        assert_eq!(batch.records[0].description.as_deref(), Some("d3"));
        assert!(!batch.records[0].is_active);
    }

    #[test]
    fn dedup_is_per_batch_only() {
        let f = csv_file("sku,name,description\nA,one,\nA,two,\n");
        let batches = collect(f.path(), 1, MalformedRowPolicy::Fail);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].records[0].name, "one");
        assert_eq!(batches[1].records[0].name, "two");
    }

    #[test]
    fn is_active_parsing() {
        let f = csv_file("sku,name,description,is_active\na,n,,True\nb,n,,yes\nc,n,,\n");
        let batch = &collect(f.path(), 10, MalformedRowPolicy::Fail)[0];
        let flags: Vec<bool> = batch.records.iter().map(|r| r.is_active).collect();
        assert_eq!(flags, vec![true, false, false]);
    }

    #[test]
    fn missing_column_fails_at_open() {
        let f = csv_file("sku,name\na,b\n");
        match Chunker::open(f.path(), 10, MalformedRowPolicy::Fail).unwrap_err() {
            IngestError::MissingColumn(col) => assert_eq!(col, "description"),
            other => panic!("expected MissingColumn, got: {other:?}"),
        }
    }

    #[test]
    fn short_row_fails_with_line_number() {
        let f = csv_file("sku,name,description\na,ok,\nb,short\n");
        let result: Result<Vec<_>, _> =
            Chunker::open(f.path(), 10, MalformedRowPolicy::Fail).unwrap().collect();
        match result.unwrap_err() {
            IngestError::MissingField { line, field } => {
                assert_eq!(line, 3);
                assert_eq!(field, "description");
            }
            other => panic!("expected MissingField, got: {other:?}"),
        }
    }

    #[test]
    fn empty_key_is_fatal_by_default() {
        let f = csv_file("sku,name,description\n  ,nameless,\n");
        let mut chunker = Chunker::open(f.path(), 10, MalformedRowPolicy::Fail).unwrap();
        assert!(matches!(
            chunker.next(),
            Some(Err(IngestError::EmptyKey { line: 2 }))
        ));
        assert!(chunker.next().is_none());
    }

    #[test]
    fn skip_policy_dead_letters_and_keeps_counting() {
        let f = csv_file("sku,name,description\na,ok,\n,bad,\nc\nd,ok,\n");
        let batches = collect(f.path(), 10, MalformedRowPolicy::Skip);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].source_rows, 4);
        assert_eq!(batches[0].rejected, 2);
        assert_eq!(batches[0].skus().collect::<Vec<_>>(), vec!["a", "d"]);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let f = csv_file(&rows(1));
        assert!(Chunker::open(f.path(), 0, MalformedRowPolicy::Fail).is_err());
    }
}
