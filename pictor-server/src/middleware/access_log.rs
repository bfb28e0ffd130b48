use crate::middleware::request_id::RequestId;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::info;

/// One structured line per request, after the response is built so the
/// status and cache tier are known.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    let tier = response
        .headers()
        .get("x-cache-tier")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        tier,
        request_id = %request_id,
        "request"
    );
    response
}
