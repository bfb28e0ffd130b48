use crate::server::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

/// GET /health — liveness plus storage/edge sub-probes. The persistent
/// store is load-bearing (503 when down); the edge cache is best-effort and
/// only reported.
pub async fn health(State(state): State<AppState>) -> Response {
    let storage_healthy = state.storage.health_check().await;
    let edge_healthy = state.edge.health_check().await;
    let status = if storage_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Json(json!({
        "status": if storage_healthy { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": { "name": state.storage.name(), "healthy": storage_healthy },
        "edge_cache": { "name": state.edge.name(), "healthy": edge_healthy },
    }));
    (status, body).into_response()
}
