//! # livequery-gateway
//!
//! Reactive query gateway: keeps the result sets of parameterized list
//! queries synchronized with PostgreSQL and pushes incremental
//! add/change/remove updates to subscribed WebSocket sessions.
//!
//! Query execution itself is delegated to registered
//! [`domain::QueryHandler`]s — this service is the observer evaluation
//! and notification engine around them.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP observe, WebSocket delivery)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Sessions (ws/)
//!     │
//!     ├── ObserverService (service/)
//!     ├── MutationHub (service/)
//!     ├── EventBus (domain/)
//!     │
//!     ├── ControlPlane + WorkerPool + Throttle (router/)
//!     ├── Fingerprint / Diff / Interceptor (domain/)
//!     │
//!     └── PostgreSQL observer state (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod router;
pub mod service;
pub mod ws;
