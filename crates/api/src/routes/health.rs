use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the job store is reachable.
    pub db_healthy: bool,
}

/// GET /health -- returns service and job store health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = trainq_db::health_check(&state.pool).await.is_ok();

    let status = if db_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
    })
}

/// GET /ping -- liveness probe with an empty JSON object.
async fn ping() -> Json<Value> {
    Json(json!({}))
}

/// Mount the unauthenticated probe routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ping", get(ping))
}
