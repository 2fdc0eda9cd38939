//! Job submission.
//!
//! Stages the uploaded file under the upload directory, records the job as
//! Pending and enqueues it. Returns the job id without waiting for a worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use bulkload_core::JobId;
use bulkload_queue::TaskQueue;

use crate::error::IngestError;
use crate::job_runner::staged_path;
use crate::progress::{ProgressTracker, ProgressUpdate};

pub struct ImportSubmitter {
    queue: Arc<dyn TaskQueue>,
    progress: Arc<dyn ProgressTracker>,
    upload_dir: PathBuf,
}

impl ImportSubmitter {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        progress: Arc<dyn ProgressTracker>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            queue,
            progress,
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Submit a file that already exists on disk. The source is copied, not moved.
    pub async fn submit_file(&self, src: &Path) -> Result<JobId, IngestError> {
        let name = src
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IngestError::InvalidUpload(format!("no file name in {}", src.display())))?;
        check_csv_name(name)?;

        let job_id = JobId::new();
        let staged = self.prepare(job_id).await?;
        tokio::fs::copy(src, &staged).await?;
        self.enqueue(job_id, staged).await
    }

    /// Submit an upload received in memory under its client-side `filename`.
    pub async fn submit_bytes(&self, filename: &str, bytes: &[u8]) -> Result<JobId, IngestError> {
        check_csv_name(filename)?;

        let job_id = JobId::new();
        let staged = self.prepare(job_id).await?;
        tokio::fs::write(&staged, bytes).await?;
        self.enqueue(job_id, staged).await
    }

    async fn prepare(&self, job_id: JobId) -> Result<PathBuf, IngestError> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        Ok(staged_path(&self.upload_dir, job_id))
    }

    async fn enqueue(&self, job_id: JobId, staged: PathBuf) -> Result<JobId, IngestError> {
        self.progress.set(job_id, ProgressUpdate::pending()).await?;

        match self.queue.enqueue(job_id, staged.clone()).await {
            Ok(handle) => {
                info!(
                    job_id = %job_id,
                    task_id = %handle.task_id,
                    path = %staged.display(),
                    "import job submitted"
                );
                Ok(job_id)
            }
            Err(e) => {
                // Nothing will ever pick this job up.
                if let Err(de) = self.progress.delete(job_id).await {
                    warn!(job_id = %job_id, error = %de, "failed to clear progress entry");
                }
                if let Err(re) = tokio::fs::remove_file(&staged).await {
                    warn!(path = %staged.display(), error = %re, "failed to remove staged file");
                }
                Err(e.into())
            }
        }
    }
}

fn check_csv_name(name: &str) -> Result<(), IngestError> {
    let is_csv = Path::new(name)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if is_csv {
        Ok(())
    } else {
        Err(IngestError::InvalidUpload(format!(
            "only .csv files are accepted, got '{name}'"
        )))
    }
}
