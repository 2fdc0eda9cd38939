use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fired once per successful import that processed at least one row.
pub const IMPORT_COMPLETED: &str = "job.import_completed";

/// An event to fan out to subscribers. Built at trigger time, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_kind: String,
    pub payload: HashMap<String, Value>,
}

impl NotificationEvent {
    pub fn new(event_kind: impl Into<String>) -> Self {
        Self {
            event_kind: event_kind.into(),
            payload: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn import_completed(count: u64) -> Self {
        Self::new(IMPORT_COMPLETED).with("count", count)
    }

    /// Wrap for the wire, stamping the current time.
    pub fn envelope(&self) -> WebhookEnvelope {
        WebhookEnvelope {
            event: self.event_kind.clone(),
            payload: self.payload.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// JSON body posted to every subscriber: `{event, payload, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    pub payload: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_completed_payload() {
        let ev = NotificationEvent::import_completed(2500);
        assert_eq!(ev.event_kind, "job.import_completed");
        assert_eq!(ev.payload["count"], serde_json::json!(2500));
    }

    #[test]
    fn envelope_wire_shape() {
        let env = NotificationEvent::import_completed(3).envelope();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["event"], "job.import_completed");
        assert_eq!(json["payload"]["count"], 3);
        assert!(json["timestamp"].is_string());
    }
}
