//! Fans events out to subscribers.
//!
//! The dispatcher looks up every active subscription for an event kind and
//! delivers to all of them concurrently. Individual subscriber failures and
//! timeouts don't block the other subscribers, and nothing is retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;

use bulkload_core::{NotificationEvent, Subscription, WebhookEnvelope};

use crate::registry::SubscriptionRegistry;
use crate::traits::{DispatchResult, Notifier, NotifyError};

pub struct Dispatcher {
    registry: Arc<dyn SubscriptionRegistry>,
    notifier: Arc<dyn Notifier>,
    /// Upper bound on a single delivery, enforced on top of the transport's own.
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn SubscriptionRegistry>,
        notifier: Arc<dyn Notifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            notifier,
            timeout,
        }
    }

    /// Deliver `payload` under `event_kind` to every active subscriber.
    pub async fn dispatch(
        &self,
        event_kind: &str,
        payload: HashMap<String, Value>,
    ) -> Vec<DispatchResult> {
        let event = NotificationEvent {
            event_kind: event_kind.to_string(),
            payload,
        };
        self.dispatch_event(&event).await
    }

    /// Deliver an already-built event.
    ///
    /// Returns one result per subscriber. A failed registry lookup is logged
    /// and yields no results.
    pub async fn dispatch_event(&self, event: &NotificationEvent) -> Vec<DispatchResult> {
        let subscriptions = match self.registry.list_active(&event.event_kind).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(
                    event = %event.event_kind,
                    error = %e,
                    "subscription lookup failed, event dropped"
                );
                return Vec::new();
            }
        };

        if subscriptions.is_empty() {
            tracing::debug!(event = %event.event_kind, "No active subscribers");
            return Vec::new();
        }

        let envelope = event.envelope();
        let deliveries = subscriptions
            .iter()
            .map(|sub| self.deliver(sub, &envelope));
        let results = join_all(deliveries).await;

        let delivered = results.iter().filter(|r| r.success).count();
        tracing::info!(
            event = %event.event_kind,
            subscribers = results.len(),
            delivered,
            failed = results.len() - delivered,
            "event dispatched"
        );
        results
    }

    async fn deliver(&self, sub: &Subscription, envelope: &WebhookEnvelope) -> DispatchResult {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(
            self.timeout,
            self.notifier.send(&sub.target_endpoint, envelope),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(self.timeout.as_millis() as u64)),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(status) => {
                tracing::debug!(
                    subscription_id = sub.id,
                    channel = self.notifier.channel_name(),
                    status,
                    duration_ms,
                    "Notification delivered"
                );
                DispatchResult {
                    subscription_id: sub.id,
                    endpoint: sub.target_endpoint.clone(),
                    success: true,
                    status: Some(status),
                    error: None,
                    duration_ms,
                }
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = sub.id,
                    channel = self.notifier.channel_name(),
                    endpoint = %sub.target_endpoint,
                    error = %e,
                    duration_ms,
                    "Notification delivery failed"
                );
                DispatchResult {
                    subscription_id: sub.id,
                    endpoint: sub.target_endpoint.clone(),
                    success: false,
                    status: e.status(),
                    error: Some(e.to_string()),
                    duration_ms,
                }
            }
        }
    }
}
