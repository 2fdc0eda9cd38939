//! Bulk CSV import pipeline.
//!
//! A submitted file is staged and queued by [`ImportSubmitter`]; an
//! [`ImportWorker`] claims it and hands it to the [`ImportJobRunner`], which
//! streams it through the [`chunker`] into an [`UpsertEngine`] batch by
//! batch, reports to a [`ProgressTracker`] after each batch and fires one
//! completion notification at the end.

pub mod chunker;
pub mod db;
pub mod error;
pub mod job_runner;
pub mod progress;
pub mod submit;
pub mod upsert;
pub mod worker;

pub use chunker::{count_records, Chunker};
pub use error::{ErrorKind, IngestError};
pub use job_runner::{ImportJobRunner, JobReport, RunnerSettings};
pub use progress::{
    watch_progress, MemoryProgressTracker, PgProgressTracker, ProgressReading, ProgressSnapshot,
    ProgressTracker, ProgressUpdate,
};
pub use submit::ImportSubmitter;
pub use upsert::{MemoryProductStore, PgUpsertEngine, UpsertEngine};
pub use worker::ImportWorker;
