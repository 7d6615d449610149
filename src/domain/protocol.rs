//! Logical event shapes crossing the engine's boundaries.
//!
//! [`MutationSignal`] is what the storage layer's commit hooks emit,
//! [`ObserverUpdate`] is what an evaluation produces for subscribed
//! sessions, and [`ItemMessage`] is the per-row client-facing event a
//! WebSocket connection sends after demultiplexing an update.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::diff::{Diff, SnapshotItem};
use super::request::ObserverId;

/// Kind of a table-level mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// A row was inserted.
    Create,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

/// Table-level change announcement from the storage layer.
///
/// Must only be emitted after the originating transaction commits so
/// observers never evaluate against uncommitted data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MutationSignal {
    /// Name of the mutated table.
    pub table: String,
    /// Change kind.
    pub kind: MutationKind,
    /// Primary key of the affected row, when known. Dependency
    /// tracking is table-granularity, so this is informational only.
    pub primary_key: Option<String>,
}

/// The result of one observer evaluation, addressed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverUpdate {
    /// Observer fingerprint.
    pub observer: ObserverId,
    /// Name of the primary key field in the item data.
    pub primary_key: String,
    /// Rows added since the previous snapshot.
    pub added: Vec<SnapshotItem>,
    /// Rows whose data or order changed.
    pub changed: Vec<SnapshotItem>,
    /// Rows removed since the previous snapshot.
    pub removed: Vec<SnapshotItem>,
}

impl ObserverUpdate {
    /// Builds an update from a computed diff.
    #[must_use]
    pub fn from_diff(observer: ObserverId, primary_key: impl Into<String>, diff: Diff) -> Self {
        Self {
            observer,
            primary_key: primary_key.into(),
            added: diff.added,
            changed: diff.changed,
            removed: diff.removed,
        }
    }
}

/// Action discriminator of a client-facing change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    /// Row entered the result set.
    Added,
    /// Row data or position changed.
    Changed,
    /// Row left the result set.
    Removed,
}

/// One change event as delivered to a client session, one per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMessage {
    /// Action that happened to the row.
    pub msg: ItemAction,
    /// Observer fingerprint the event belongs to.
    pub observer: ObserverId,
    /// Name of the primary key field in `item`.
    pub primary_key: String,
    /// Row position in the ordered result set.
    pub order: i32,
    /// Full row data.
    pub item: serde_json::Value,
}

impl ItemMessage {
    /// Demultiplexes an update into per-row messages in added,
    /// changed, removed order.
    #[must_use]
    pub fn demultiplex(update: &ObserverUpdate) -> Vec<Self> {
        let one = |action: ItemAction, item: &SnapshotItem| Self {
            msg: action,
            observer: update.observer.clone(),
            primary_key: update.primary_key.clone(),
            order: item.order,
            item: item.data.clone(),
        };
        update
            .added
            .iter()
            .map(|item| one(ItemAction::Added, item))
            .chain(update.changed.iter().map(|item| one(ItemAction::Changed, item)))
            .chain(update.removed.iter().map(|item| one(ItemAction::Removed, item)))
            .collect()
    }
}
