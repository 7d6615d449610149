//! DTOs for the observe, unsubscribe and notify endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Synchronous response to a subscribe (observe) request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscribeResponse {
    /// Observer fingerprint; use it to unsubscribe and to correlate
    /// WebSocket change events.
    pub observer: String,
    /// Full current result set, in order.
    pub items: Vec<serde_json::Value>,
}

/// Query parameters of the unsubscribe endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UnsubscribeParams {
    /// Observer fingerprint to unsubscribe from.
    pub observer: Option<String>,
    /// Session identifier of the subscriber.
    pub subscriber: Option<String>,
}

/// Response of the mutation-notify endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NotifyResponse {
    /// Whether the signal was forwarded to the router (`false` when no
    /// observer depends on the table).
    pub forwarded: bool,
}
