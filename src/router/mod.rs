//! Notification router: control plane, worker pool and throttle.
//!
//! Two channels, as in the logical design: a lightweight control
//! channel for mutation signals, poll timers and throttle bookkeeping,
//! and a worker channel for the expensive handler re-executions.

pub mod control;
pub mod messages;
pub mod throttle;
pub mod worker;

pub use control::ControlPlane;
pub use messages::{ControlMessage, WorkerMessage};
pub use throttle::{ThrottleController, ThrottleDecision};
pub use worker::spawn_workers;
