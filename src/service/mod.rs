//! Service layer: observer orchestration and mutation signal intake.
//!
//! [`ObserverService`] coordinates subscribe/evaluate against the
//! durable store and emits session notices through the
//! [`crate::domain::EventBus`]; [`MutationHub`] is the commit-hook
//! entry point feeding the router.

pub mod observer;
pub mod signals;

pub use observer::{ObserverService, Subscription};
pub use signals::{MutationHub, SignalContext};
