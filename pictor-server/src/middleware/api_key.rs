use crate::error::ApiError;
use crate::middleware::request_id::RequestId;
use crate::server::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use pictor_core::PictorError;

const API_KEY_HEADER: &str = "x-api-key";

/// Optional API-key gate for the /api/v1 namespace. Image-serving routes
/// and /health are never behind it.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.http.api_keys_enabled {
        return next.run(request).await;
    }
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !provided.is_empty() && state.config.http.api_keys.iter().any(|k| k == provided) {
        return next.run(request).await;
    }
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();
    ApiError::new(PictorError::Unauthorized, request_id).into_response()
}
