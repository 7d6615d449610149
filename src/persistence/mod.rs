//! Persistence layer: durable observer state in PostgreSQL.
//!
//! Observer, item-snapshot, dependency and subscriber records are
//! persisted so that any worker process can pick up evaluation. The
//! schema lives in `migrations/`; [`postgres::ObserverStore`] is the
//! only component that talks SQL.

pub mod models;
pub mod postgres;

pub use models::{DependencyRecord, ObserverRecord, SubscriberRecord};
pub use postgres::ObserverStore;
