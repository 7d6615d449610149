//! REST API layer: route handlers, DTOs, and router composition.
//!
//! All endpoints are mounted under `/api/v1`, except the system
//! endpoints (`/health`, `/config/handlers`) which live at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document covering every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "livequery-gateway",
        description = "Reactive query gateway: observe registered query handlers and receive per-row change events over WebSocket."
    ),
    paths(
        handlers::query::query_handler,
        handlers::observer::unsubscribe_handler,
        handlers::observer::notify_handler,
        handlers::system::health_handler,
        handlers::system::handlers_handler,
    ),
    tags(
        (name = "Query", description = "Observable query execution"),
        (name = "Observers", description = "Subscription and mutation control plane"),
        (name = "System", description = "Health and configuration"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
