//! Task dispatch for import jobs.
//!
//! Submitters `enqueue` a job and return immediately; workers `claim`
//! tasks, run them, then `ack` or `fail` them. Delivery is at-least-once:
//! a claimed task whose lease runs out is handed to another worker.

pub mod consumer;
pub mod error;
pub mod memory;
pub mod postgres;

pub use consumer::{ImportTask, QueueHealth, TaskHandle, TaskQueue, TaskStatus};
pub use error::QueueError;
pub use memory::MemoryTaskQueue;
pub use postgres::PgTaskQueue;
