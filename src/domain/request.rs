//! Replayable request descriptors and observer fingerprints.
//!
//! A [`RequestDescriptor`] captures everything needed to re-invoke a
//! query handler on any worker process: handler name, method, arguments,
//! normalized query parameters, path and caller identity. Its JSON
//! encoding is the stable cross-process representation stored in the
//! `observers.request` column.
//!
//! [`ObserverId`] is the fingerprint derived from a descriptor: two
//! sessions observing the same query as the same caller hash to the
//! same id and share one observer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Query parameter that marks a request as an observe request. It is
/// stripped from the normalized query before fingerprinting so that the
/// session identifier never influences the observer id.
pub const OBSERVE_QUERY_PARAMETER: &str = "observe";

/// Identity recorded for unauthenticated callers.
const ANONYMOUS: &str = "anonymous";

/// Stable fingerprint identifying one observed query+caller combination.
///
/// A 64-character lowercase hex digest (256-bit BLAKE3). Primary key of
/// the `observers` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(String);

impl ObserverId {
    /// Computes the fingerprint of a request descriptor.
    ///
    /// Hashes the handler name, method name, sorted query parameter
    /// key/value pairs, path, and caller identity (or the literal
    /// `anonymous`). Positional and keyword arguments are not hashed:
    /// they are derived from the path, which is already included.
    #[must_use]
    pub fn compute(request: &RequestDescriptor) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(request.handler.as_bytes());
        hasher.update(request.handler_method.as_bytes());
        for (key, value) in &request.query {
            hasher.update(key.as_bytes());
            hasher.update(value.as_bytes());
        }
        hasher.update(request.path.as_bytes());
        match &request.identity {
            Some(identity) => hasher.update(identity.as_bytes()),
            None => hasher.update(ANONYMOUS.as_bytes()),
        };
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Wraps an already-computed fingerprint, e.g. one read back from
    /// the database or received in a router message.
    #[must_use]
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Returns the hex digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serializable descriptor of how to re-invoke a query handler.
///
/// Stored as JSONB in the `observers` table so that a worker that did
/// not originate the request can replay the evaluation. Deterministically
/// re-derivable to the same [`ObserverId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Registered handler name.
    pub handler: String,
    /// Handler method being observed (e.g. `list`).
    pub handler_method: String,
    /// HTTP method of the originating request.
    pub method: String,
    /// Positional arguments extracted from the route.
    #[serde(default)]
    pub args: Vec<String>,
    /// Keyword arguments extracted from the route.
    #[serde(default)]
    pub kwargs: BTreeMap<String, String>,
    /// Normalized query parameters, sorted by key, with the observe
    /// control parameter removed.
    pub query: BTreeMap<String, String>,
    /// Request path.
    pub path: String,
    /// Caller identity, `None` for anonymous requests.
    pub identity: Option<String>,
}

impl RequestDescriptor {
    /// Builds a descriptor from raw query pairs.
    ///
    /// Sorts the parameters by key and strips the
    /// [`OBSERVE_QUERY_PARAMETER`]. Exact string-level equality of the
    /// normalized parameters is the dedup contract; semantically
    /// equivalent filters expressed differently produce different
    /// fingerprints.
    #[must_use]
    pub fn new(
        handler: impl Into<String>,
        handler_method: impl Into<String>,
        method: impl Into<String>,
        query: impl IntoIterator<Item = (String, String)>,
        path: impl Into<String>,
        identity: Option<String>,
    ) -> Self {
        let query: BTreeMap<String, String> = query
            .into_iter()
            .filter(|(key, _)| key != OBSERVE_QUERY_PARAMETER)
            .collect();

        Self {
            handler: handler.into(),
            handler_method: handler_method.into(),
            method: method.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            query,
            path: path.into(),
            identity,
        }
    }

    /// The fingerprint of this descriptor.
    #[must_use]
    pub fn observer_id(&self) -> ObserverId {
        ObserverId::compute(self)
    }
}
