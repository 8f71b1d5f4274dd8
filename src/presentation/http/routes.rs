//! Route Configuration
//!
//! Configures all HTTP routes for the API.

use axum::{
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::{
    auth_middleware, rate_limit_api, rate_limit_call, track_metrics,
};
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes(state.clone()))
        // WebSocket endpoint, authenticated via ?token= query parameter
        .route("/ws", get(ws_handler))
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // Prometheus metrics endpoint
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// API routes
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/calls", call_routes(state.clone()))
        .nest("/admin", admin_routes(state.clone()))
        // Apply API rate limiting to all API routes
        .route_layer(middleware::from_fn_with_state(state, rate_limit_api))
}

/// Call routes (protected, with per-user initiation limits)
fn call_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::call::initiate_call))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_call,
        ))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Admin routes (protected)
fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/buffers", get(handlers::admin::buffer_stats))
        .route("/buffers", delete(handlers::admin::clear_buffers))
        .route("/buffers/flush", post(handlers::admin::flush_buffers))
        .route("/unread/sync", post(handlers::admin::sync_unread))
        .route("/presence", get(handlers::admin::presence))
        .route("/events", get(handlers::admin::event_stats))
        .route("/events", delete(handlers::admin::reset_event_stats))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
