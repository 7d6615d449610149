//! Observable query endpoint: subscribe or one-shot execution.

use std::collections::HashMap;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;

use crate::api::dto::SubscribeResponse;
use crate::app_state::AppState;
use crate::domain::request::{OBSERVE_QUERY_PARAMETER, RequestDescriptor};
use crate::error::{ErrorResponse, GatewayError};

/// Header carrying the caller identity established by the (external)
/// authentication layer. Absent means anonymous.
const IDENTITY_HEADER: &str = "x-identity";

/// `GET /query/{handler}` — Execute a registered query handler.
///
/// With an `observe=<session_id>` query parameter the session is
/// subscribed to the query's observer and the response carries the
/// observer fingerprint alongside the full current result set; change
/// events then arrive on the session's WebSocket. Without it, the
/// handler executes once and its raw result is returned.
///
/// # Errors
///
/// Returns [`GatewayError`] for unknown handlers, malformed handler
/// results and persistence failures.
#[utoipa::path(
    get,
    path = "/api/v1/query/{handler}",
    tag = "Query",
    summary = "Execute or observe a query",
    description = "Runs the named query handler. Pass `observe=<session_id>` to subscribe the session to live updates; all other query parameters are forwarded to the handler and become part of the observer fingerprint.",
    params(
        ("handler" = String, Path, description = "Registered handler name"),
        ("observe" = Option<String>, Query, description = "Session identifier to subscribe"),
    ),
    responses(
        (status = 200, description = "Observer fingerprint and current items, or the raw handler result", body = SubscribeResponse),
        (status = 404, description = "Unknown handler", body = ErrorResponse),
    )
)]
pub async fn query_handler(
    State(state): State<AppState>,
    Path(handler): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    let identity = headers
        .get(IDENTITY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let session_id = params.get(OBSERVE_QUERY_PARAMETER).cloned();
    let path = format!("/api/v1/query/{handler}");
    let descriptor = RequestDescriptor::new(handler, "list", "GET", params, path, identity);

    match session_id {
        Some(session_id) => {
            let subscription = state.observer_service.subscribe(&descriptor, &session_id).await?;
            Ok(Json(SubscribeResponse {
                observer: subscription.observer.to_string(),
                items: subscription.items,
            })
            .into_response())
        }
        None => {
            // Non-reactive passthrough.
            let result = state.observer_service.execute_once(&descriptor).await?;
            Ok(Json(result).into_response())
        }
    }
}

/// Query routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/query/{handler}", get(query_handler))
}
