//! Observer control-plane endpoints: unsubscribe and mutation notify.

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;

use crate::api::dto::{NotifyResponse, UnsubscribeParams};
use crate::app_state::AppState;
use crate::domain::protocol::MutationSignal;
use crate::domain::request::ObserverId;
use crate::error::{ErrorResponse, GatewayError};
use crate::service::SignalContext;

/// `POST /unsubscribe` — Remove a session's subscription to an observer.
///
/// When this was the observer's last subscriber, the observer and its
/// snapshot and dependencies are deleted.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when either parameter is
/// missing; the request never reaches the observer layer.
#[utoipa::path(
    post,
    path = "/api/v1/unsubscribe",
    tag = "Observers",
    summary = "Unsubscribe a session from an observer",
    params(
        ("observer" = String, Query, description = "Observer fingerprint"),
        ("subscriber" = String, Query, description = "Session identifier"),
    ),
    responses(
        (status = 204, description = "Subscription removed"),
        (status = 400, description = "Missing parameters", body = ErrorResponse),
    )
)]
pub async fn unsubscribe_handler(
    State(state): State<AppState>,
    Query(params): Query<UnsubscribeParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let observer = params
        .observer
        .ok_or_else(|| GatewayError::InvalidRequest("missing 'observer' parameter".to_string()))?;
    let subscriber = params
        .subscriber
        .ok_or_else(|| GatewayError::InvalidRequest("missing 'subscriber' parameter".to_string()))?;

    state
        .observer_service
        .unsubscribe(&ObserverId::from_string(observer), &subscriber)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /notify` — Announce a committed table mutation.
///
/// Entry point for out-of-process storage commit hooks. The signal is
/// dropped when no observer depends on the table.
///
/// # Errors
///
/// Returns [`GatewayError::PersistenceError`] when the dependency
/// lookup fails.
#[utoipa::path(
    post,
    path = "/api/v1/notify",
    tag = "Observers",
    summary = "Announce a table mutation",
    request_body = MutationSignal,
    responses(
        (status = 200, description = "Signal accepted", body = NotifyResponse),
    )
)]
pub async fn notify_handler(
    State(state): State<AppState>,
    Json(signal): Json<MutationSignal>,
) -> Result<impl IntoResponse, GatewayError> {
    let forwarded = state
        .mutation_hub
        .notify(signal, SignalContext::default())
        .await?;
    Ok(Json(NotifyResponse { forwarded }))
}

/// Observer control routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/unsubscribe", post(unsubscribe_handler))
        .route("/notify", post(notify_handler))
}
