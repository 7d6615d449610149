//! Axum WebSocket upgrade handler.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;

/// `GET /ws/{session_id}` — Upgrade HTTP connection to WebSocket.
///
/// The session identifier in the path is the subscriber identity used
/// by observe requests; a subscriber row is created on connect and
/// removed (with observer garbage collection) on disconnect.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let event_rx = state.event_bus.subscribe();
    let store = std::sync::Arc::clone(&state.store);

    ws.on_upgrade(move |socket| run_connection(socket, event_rx, store, session_id))
}
