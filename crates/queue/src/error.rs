//! Queue error types.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error("invalid task row: {0}")]
    Parse(String),

    #[error("task {task_id} attempt {attempt} no longer holds the lease")]
    LeaseLost { task_id: Uuid, attempt: u32 },
}
