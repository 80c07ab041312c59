//! Router configuration for the ticket API.

use super::auth::require_api_token;
use super::handlers;
use super::health::{health_check, metrics_handler, readiness_check};
use super::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// - `/health`, `/ready`, `/metrics`: unauthenticated
/// - `/api/scan`, `/api/tickets/...`: bearer token when configured
///
/// Scans live outside `/tickets` so that every path segment there is a ticket id.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/scan", post(handlers::scan_ticket))
        .route("/tickets/:id", get(handlers::get_ticket))
        .route(
            "/tickets/:id/conditional-update",
            post(handlers::conditional_update),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
