//! Snapshot diffing for observed result sets.
//!
//! Given the previous persisted snapshot and a freshly evaluated result
//! set, [`diff`] computes which rows were added, changed or removed,
//! tracking 0-based positional order. An order-only move still counts
//! as changed: clients need the new position even when the content is
//! identical, so the full row data is retransmitted in that case.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::GatewayError;

/// Sentinel primary key assigned to single-object responses that do not
/// carry the configured primary key field.
const SINGLE_OBJECT_PRIMARY_KEY: u64 = 1;

/// One row of an observer snapshot: identity, position and data.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SnapshotItem {
    /// String form of the row's primary key field.
    pub primary_key: String,
    /// 0-based position in the ordered result set.
    pub order: i32,
    /// Full serialized row.
    pub data: Value,
}

/// Result of diffing a new result set against the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Rows whose primary key was absent from the previous snapshot.
    pub added: Vec<SnapshotItem>,
    /// Rows present in both whose data or order differs.
    pub changed: Vec<SnapshotItem>,
    /// Rows from the previous snapshot absent from the new result,
    /// with their previous order and data.
    pub removed: Vec<SnapshotItem>,
}

impl Diff {
    /// Returns `true` when nothing was added, changed or removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Normalizes a handler response into an ordered list of flat rows.
///
/// - A JSON array passes through (each element must be an object).
/// - A paginated envelope `{"results": [...], ...}` is unwrapped to its
///   `results` list; the metadata is dropped.
/// - Any other JSON object is treated as a single-row result; when the
///   primary key field is missing it is forced to the sentinel `1`.
///
/// # Errors
///
/// Returns [`GatewayError::MalformedResult`] when the response is
/// neither an object nor a list, or when a list element is not an
/// object.
pub fn normalize_rows(
    response: Value,
    primary_key: &str,
) -> Result<Vec<Map<String, Value>>, GatewayError> {
    match response {
        Value::Array(rows) => rows
            .into_iter()
            .map(|row| match row {
                Value::Object(map) => Ok(map),
                _ => Err(GatewayError::MalformedResult),
            })
            .collect(),
        Value::Object(mut map) => {
            // NOTE: this can incidentally match a single object that
            // happens to have a `results` list field.
            if let Some(Value::Array(_)) = map.get("results") {
                if let Some(Value::Array(rows)) = map.remove("results") {
                    return normalize_rows(Value::Array(rows), primary_key);
                }
            }
            map.entry(primary_key.to_string())
                .or_insert_with(|| Value::from(SINGLE_OBJECT_PRIMARY_KEY));
            Ok(vec![map])
        }
        _ => Err(GatewayError::MalformedResult),
    }
}

/// Extracts the string form of a row's primary key.
fn primary_key_of(row: &Map<String, Value>, primary_key: &str) -> Result<String, GatewayError> {
    let value = row
        .get(primary_key)
        .ok_or_else(|| GatewayError::MissingPrimaryKeyField(primary_key.to_string()))?;
    Ok(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Computes the added/changed/removed delta between the previous
/// snapshot and a normalized result set.
///
/// `previous` is the persisted snapshot in any order; `rows` is the new
/// ordered result (order is assigned by enumeration). A row counts as
/// changed when its data differs (deep equality) or when only its order
/// moved.
///
/// # Errors
///
/// Returns [`GatewayError::MissingPrimaryKeyField`] when a new row does
/// not carry the configured primary key field.
pub fn diff(
    previous: &[SnapshotItem],
    rows: Vec<Map<String, Value>>,
    primary_key: &str,
) -> Result<Diff, GatewayError> {
    // New result, keyed by primary key, preserving enumeration order.
    // A duplicate primary key overwrites the earlier occurrence (last
    // wins), so at most one item per key survives into the snapshot.
    let mut new_items: Vec<SnapshotItem> = Vec::with_capacity(rows.len());
    let mut slot_by_pk: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    for (order, row) in rows.into_iter().enumerate() {
        let pk = primary_key_of(&row, primary_key)?;
        let item = SnapshotItem {
            primary_key: pk.clone(),
            order: i32::try_from(order).unwrap_or(i32::MAX),
            data: Value::Object(row),
        };
        match slot_by_pk.get(&pk) {
            Some(&slot) => {
                if let Some(existing) = new_items.get_mut(slot) {
                    *existing = item;
                }
            }
            None => {
                slot_by_pk.insert(pk, new_items.len());
                new_items.push(item);
            }
        }
    }

    let mut result = Diff::default();

    for old in previous {
        if !new_items
            .iter()
            .any(|item| item.primary_key == old.primary_key)
        {
            result.removed.push(old.clone());
        }
    }

    for item in new_items {
        match previous.iter().find(|old| old.primary_key == item.primary_key) {
            None => result.added.push(item),
            Some(old) if old.data != item.data || old.order != item.order => {
                // TODO: when only the order moved, the full data is
                // still retransmitted (needs client support to drop).
                result.changed.push(item);
            }
            Some(_) => {}
        }
    }

    Ok(result)
}
