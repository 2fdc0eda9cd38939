//! Notifier trait definition and shared error types.

use bulkload_core::WebhookEnvelope;
use serde::Serialize;

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("subscriber returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("delivery timed out after {0}ms")]
    Timeout(u64),

    #[error("subscription lookup failed: {0}")]
    Registry(#[from] sqlx::Error),

    #[error("subscription not found: {0}")]
    NotFound(i64),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NotifyError {
    /// HTTP status carried by the error, when the subscriber answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            NotifyError::Status { status, .. } => Some(*status),
            NotifyError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Outbound transport for one event to one endpoint.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `envelope` to `endpoint`. Returns the transport-level status on
    /// success.
    async fn send(&self, endpoint: &str, envelope: &WebhookEnvelope) -> Result<u16, NotifyError>;

    /// Human-readable name for this channel (e.g., "webhook").
    fn channel_name(&self) -> &str;
}

/// Result of delivering an event to a single subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub subscription_id: i64,
    pub endpoint: String,
    pub success: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub duration_ms: u64,
}
