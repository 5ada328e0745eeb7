//! Health check and metrics endpoints

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};

use crate::http::AppState;

/// Health and metrics router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/cluster", get(cluster_health))
        .route("/metrics", get(metrics))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Node id, room/connection counts and whether Redis fan-out is on
pub async fn cluster_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cluster.metrics())
}

pub async fn metrics() -> impl IntoResponse {
    match fleetrelay_core::metrics::gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
