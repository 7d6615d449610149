//! WebSocket connection loop for one client session.
//!
//! Registers the session as a subscriber on connect, forwards observer
//! updates addressed to this session (demultiplexed into one message
//! per row), and removes the session with observer garbage collection
//! on disconnect. Clients do not send commands over the socket —
//! subscriptions are established via the REST observe endpoint.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::event_bus::SessionNotice;
use crate::domain::protocol::ItemMessage;
use crate::persistence::ObserverStore;

/// Runs the read/write loop for a single WebSocket connection.
pub async fn run_connection(
    socket: WebSocket,
    mut event_rx: broadcast::Receiver<SessionNotice>,
    store: Arc<ObserverStore>,
    session_id: String,
) {
    // Several sockets may carry the same session id; the connection id
    // tells them apart in the logs.
    let connection_id = Uuid::new_v4();

    if let Err(err) = store.create_session(&session_id).await {
        tracing::error!(session = %session_id, connection = %connection_id, error = %err,
            "failed to register subscriber");
        return;
    }
    tracing::debug!(session = %session_id, connection = %connection_id, "ws session connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Incoming frames: only liveness; close ends the session.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            // Observer updates from the event bus.
            notice = event_rx.recv() => {
                match notice {
                    Ok(notice) if notice.session_id == session_id => {
                        if forward_update(&mut ws_tx, &notice).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(session = %session_id, lagged = n,
                            "ws client lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if let Err(err) = store.remove_session(&session_id).await {
        tracing::error!(session = %session_id, error = %err, "failed to remove subscriber");
    }
    tracing::debug!(session = %session_id, connection = %connection_id, "ws session closed");
}

/// Sends one message per changed row to the client.
async fn forward_update(
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    notice: &SessionNotice,
) -> Result<(), ()> {
    for message in ItemMessage::demultiplex(&notice.update) {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(session = %notice.session_id, observer = %message.observer,
                    error = %err, "failed to encode change event, skipping row");
                continue;
            }
        };
        if ws_tx.send(Message::text(json)).await.is_err() {
            return Err(());
        }
    }
    Ok(())
}
