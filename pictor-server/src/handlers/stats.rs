use crate::server::AppState;
use axum::extract::State;
use axum::response::Json;
use serde_json::{Value, json};

/// GET /api/v1/stats — minimal operational snapshot.
pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "storage": state.storage.name(),
        "edge_cache": state.edge.name(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
