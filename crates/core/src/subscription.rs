use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered endpoint interested in one kind of notification event.
///
/// Managed outside the import pipeline; the dispatcher only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub target_endpoint: String,
    pub event_kind: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, event_kind: &str) -> bool {
        self.is_active && self.event_kind == event_kind
    }
}
