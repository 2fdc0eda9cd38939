//! HTTP webhook notifier.
//!
//! Delivers event envelopes as JSON `POST`s to subscriber URLs through one
//! shared client with a bounded per-request timeout.

use std::time::Duration;

use bulkload_core::WebhookEnvelope;

use crate::traits::{Notifier, NotifyError};

/// Posts `{event, payload, timestamp}` JSON to subscriber endpoints.
///
/// Endpoints are used exactly as registered.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, endpoint: &str, envelope: &WebhookEnvelope) -> Result<u16, NotifyError> {
        let response = self
            .client
            .post(endpoint)
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    NotifyError::Http(e)
                }
            })?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                url = %endpoint,
                %status,
                body = %body_text,
                "webhook returned non-2xx status"
            );
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body: body_text,
            });
        }

        tracing::debug!(
            url = %endpoint,
            event = %envelope.event,
            status = %status,
            "webhook notification delivered"
        );

        Ok(status.as_u16())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}
