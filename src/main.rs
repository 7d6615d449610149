//! livequery-gateway server entry point.
//!
//! Starts the Axum HTTP server with the observe/unsubscribe/notify
//! REST endpoints and the WebSocket delivery endpoint, plus the
//! control plane and worker pool tasks.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use livequery_gateway::api;
use livequery_gateway::app_state::AppState;
use livequery_gateway::config::GatewayConfig;
use livequery_gateway::domain::EventBus;
use livequery_gateway::domain::handler::HandlerRegistry;
use livequery_gateway::persistence::ObserverStore;
use livequery_gateway::router::{ControlPlane, ThrottleController, spawn_workers};
use livequery_gateway::service::{MutationHub, ObserverService};
use livequery_gateway::ws::handler::ws_handler;

/// Capacity of the bounded worker channel; evaluate messages beyond
/// this apply backpressure on the control plane.
const WORKER_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = GatewayConfig::from_env()
        .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;
    tracing::info!(addr = %config.listen_addr, "starting livequery-gateway");

    // Database pool + schema
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .acquire_timeout(std::time::Duration::from_secs(
            config.database_connect_timeout_secs,
        ))
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let store = Arc::new(ObserverStore::new(pool));
    let event_bus = EventBus::new(config.event_bus_capacity);

    // Handlers are registered by the embedding application; the bare
    // server starts with an empty registry and serves only the system
    // and control-plane endpoints.
    let registry = Arc::new(HandlerRegistry::new());

    // Router channels
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (worker_tx, worker_rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);

    let observer_service = Arc::new(ObserverService::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        event_bus.clone(),
        control_tx.clone(),
        config.observer.clone(),
    ));

    let throttle = Arc::new(ThrottleController::new(config.observer.throttle_rate));
    ControlPlane::new(
        Arc::clone(&store),
        Arc::clone(&throttle),
        worker_tx,
        control_tx.clone(),
    )
    .spawn(control_rx);
    spawn_workers(
        Arc::clone(&observer_service),
        worker_rx,
        config.worker_count,
    );

    let mutation_hub = MutationHub::new(Arc::clone(&store), control_tx);

    // Build application state
    let app_state = AppState {
        observer_service,
        store,
        event_bus,
        mutation_hub,
        registry,
    };

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .route("/ws/{session_id}", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
