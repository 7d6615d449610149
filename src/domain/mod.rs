//! Domain layer: fingerprints, diffing, dependency tracking, handler
//! seam and the session event bus.
//!
//! This module contains the engine's pure core: the replayable request
//! descriptor with its stable fingerprint, the snapshot diff engine,
//! the task-local query interceptor, the registered-handler seam and
//! the logical event shapes exchanged with transports and storage.

pub mod diff;
pub mod event_bus;
pub mod handler;
pub mod interceptor;
pub mod protocol;
pub mod request;

pub use diff::{Diff, SnapshotItem};
pub use event_bus::{EventBus, SessionNotice};
pub use handler::{ChangeDetection, HandlerConfig, HandlerError, HandlerRegistry, QueryHandler};
pub use protocol::{ItemAction, ItemMessage, MutationKind, MutationSignal, ObserverUpdate};
pub use request::{OBSERVE_QUERY_PARAMETER, ObserverId, RequestDescriptor};
