//! System endpoints: health check and handler catalog.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Registered handler info.
#[derive(Debug, Serialize, ToSchema)]
struct HandlerInfo {
    name: String,
}

/// `GET /config/handlers` — List registered observable handlers.
#[utoipa::path(
    get,
    path = "/config/handlers",
    tag = "System",
    summary = "List registered handlers",
    description = "Returns the names of every query handler the gateway can execute or observe.",
    responses(
        (status = 200, description = "Handler catalog", body = Vec<HandlerInfo>),
    )
)]
pub async fn handlers_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut names = state.registry.names();
    names.sort_unstable();
    let catalog: Vec<HandlerInfo> = names
        .into_iter()
        .map(|name| HandlerInfo {
            name: name.to_string(),
        })
        .collect();
    (StatusCode::OK, Json(catalog))
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/config/handlers", get(handlers_handler))
}
