//! Import pipeline errors.

use bulkload_core::CoreError;
use bulkload_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing required column '{0}'")]
    MissingColumn(String),

    #[error("line {line}: missing value for '{field}'")]
    MissingField { line: u64, field: &'static str },

    #[error("line {line}: empty sku")]
    EmptyKey { line: u64 },

    #[error("rejected upload: {0}")]
    InvalidUpload(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("store operation timed out after {0}s")]
    StoreTimeout(u64),

    #[error("store error: {0}")]
    Store(String),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("job cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

/// Coarse failure classes used for logging and task bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or unreadable input file. Retrying the same file won't help.
    MalformedInput,
    /// The durable store refused or didn't answer in time.
    Store,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::Store => "store",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Io(_)
            | IngestError::Csv(_)
            | IngestError::MissingColumn(_)
            | IngestError::MissingField { .. }
            | IngestError::EmptyKey { .. }
            | IngestError::InvalidUpload(_) => ErrorKind::MalformedInput,
            IngestError::Database(_)
            | IngestError::Migrate(_)
            | IngestError::StoreTimeout(_)
            | IngestError::Store(_) => ErrorKind::Store,
            IngestError::Cancelled => ErrorKind::Cancelled,
            IngestError::Queue(_)
            | IngestError::Core(_)
            | IngestError::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            IngestError::MissingField { line: 3, field: "name" }.kind(),
            ErrorKind::MalformedInput
        );
        assert_eq!(IngestError::EmptyKey { line: 2 }.kind(), ErrorKind::MalformedInput);
        assert_eq!(IngestError::StoreTimeout(30).kind(), ErrorKind::Store);
        assert_eq!(IngestError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(IngestError::Internal("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn messages_carry_line_numbers() {
        let e = IngestError::MissingField { line: 7, field: "description" };
        assert_eq!(e.to_string(), "line 7: missing value for 'description'");
    }
}
