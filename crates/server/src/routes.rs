//! Route configuration.

use crate::state::AppState;
use crate::ws;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Health check (intentionally unauthenticated for load balancers/probes).
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sync", get(ws::sync_handler))
        .route("/v1/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
