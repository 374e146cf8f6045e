//! Liveness, status and metrics endpoints.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::{Json, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::encoding::reply_value;
use crate::state::GatewayState;

/// Common query shape for read endpoints.
#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub compress: Option<String>,
}

/// Simple health-check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// `GET /health`
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /status`
///
/// The consensus-relevant snapshot other nodes poll every second.
pub async fn status(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let report = state.ctx.memserver.lock().await.status_report();
    reply_value(&report, query.compress.as_deref())
}

/// `GET /metrics`
///
/// Prometheus text exposition.
pub async fn metrics(State(state): State<GatewayState>) -> String {
    state.ctx.metrics.gather_text()
}
