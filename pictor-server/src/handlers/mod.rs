pub mod cache;
pub mod health;
pub mod proxy;
pub mod stable;
pub mod stats;

use crate::server::AppState;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use pictor_pipeline::pipeline::ProxyResponse;

/// Render a pipeline result as an image response with the cache headers.
/// `X-Original-Size` is present only on ORIGIN responses.
pub(crate) fn image_response(
    result: ProxyResponse,
    state: &AppState,
    request_id: &str,
) -> Response {
    let cache_control = format!(
        "public, max-age=3600, s-maxage={}, stale-while-revalidate=3600",
        state.config.http.cache_ttl_secs
    );
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, result.content_type.as_str())
        .header(header::CONTENT_LENGTH, result.bytes.len())
        .header(header::CACHE_CONTROL, cache_control)
        .header("x-cache", if result.tier.is_hit() { "HIT" } else { "MISS" })
        .header("x-cache-tier", result.tier.as_str())
        .header("x-optimized-size", result.bytes.len())
        .header("x-request-id", request_id);
    if let Some(original_size) = result.original_size {
        builder = builder.header("x-original-size", original_size);
    }
    builder
        .body(Body::from(result.bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
