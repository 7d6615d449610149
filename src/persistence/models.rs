//! Database models for durable observer state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An observer row from the `observers` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverRecord {
    /// Fingerprint of the observed query (64-char hex).
    pub id: String,
    /// Replayable request descriptor as JSONB.
    pub request: serde_json::Value,
    /// When the observer was last evaluated; `NULL` until the first
    /// evaluation completes.
    pub last_evaluation: Option<DateTime<Utc>>,
    /// Poll interval in seconds; present only for poll-mode observers.
    pub poll_interval: Option<i32>,
}

/// A subscriber row from the `subscribers` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberRecord {
    /// Transport-level session identifier.
    pub session_id: String,
    /// When the session first subscribed to anything.
    pub created: DateTime<Utc>,
}

/// A dependency row: the observer's last execution read this table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRecord {
    /// Owning observer fingerprint.
    pub observer_id: String,
    /// Storage table name.
    pub table_name: String,
}
