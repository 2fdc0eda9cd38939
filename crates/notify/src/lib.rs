//! Event notifications for finished imports.
//!
//! This crate provides:
//! - `SubscriptionRegistry` for looking up who wants which event
//! - `Notifier` trait for the outbound transport, with a webhook implementation
//! - `Dispatcher` that fans one event out to every active subscriber,
//!   isolating per-subscriber failures

pub mod dispatcher;
pub mod registry;
pub mod traits;
pub mod webhook;

pub use dispatcher::Dispatcher;
pub use registry::{MemorySubscriptionRegistry, PgSubscriptionRegistry, SubscriptionRegistry};
pub use traits::{DispatchResult, Notifier, NotifyError};
pub use webhook::WebhookNotifier;
