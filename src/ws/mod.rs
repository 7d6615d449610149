//! WebSocket layer: session lifecycle and update delivery.
//!
//! The WebSocket endpoint at `/ws/{session_id}` is delivery-only:
//! clients subscribe to observers over REST and receive per-row change
//! events here.

pub mod connection;
pub mod handler;
