//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventBus;
use crate::domain::handler::HandlerRegistry;
use crate::persistence::ObserverStore;
use crate::service::{MutationHub, ObserverService};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Observer service for subscribe/evaluate orchestration.
    pub observer_service: Arc<ObserverService>,
    /// Durable observer state store.
    pub store: Arc<ObserverStore>,
    /// Event bus for WebSocket update delivery.
    pub event_bus: EventBus,
    /// Mutation signal intake.
    pub mutation_hub: MutationHub,
    /// Registered query handlers.
    pub registry: Arc<HandlerRegistry>,
}
