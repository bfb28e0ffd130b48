use crate::error::ApiError;
use crate::handlers::image_response;
use crate::handlers::proxy::TransformParams;
use crate::middleware::request_id::RequestId;
use crate::server::AppState;
use axum::Extension;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use pictor_core::validate;
use pictor_pipeline::pipeline::{ProxyRequest, RequestMeta, UpstreamErrorMode};

/// GET /img/{workspace_id}/{block_id}/{filename} — the stable path.
///
/// The upstream URL is reconstructed deterministically from the canonical
/// host; no signature is available, so the route runs in cache-miss error
/// mode: it can only serve what a prior explicit-URL request captured.
pub async fn stable_image(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Path((workspace_id, block_id, filename)): Path<(String, String, String)>,
    Query(params): Query<TransformParams>,
) -> Result<Response, ApiError> {
    let upstream_url = format!(
        "https://{}/{}/{}/{}",
        state.config.upstream.canonical_host, workspace_id, block_id, filename
    );
    validate::validate_url(&upstream_url, &state.allowed)
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let result = state
        .pipeline
        .execute(ProxyRequest {
            cache_base_url: upstream_url.clone(),
            upstream_url,
            options: params.options(),
            accept,
            meta: RequestMeta {
                workspace_id: Some(workspace_id),
                block_id: Some(block_id),
            },
            error_mode: UpstreamErrorMode::CacheMiss,
        })
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    Ok(image_response(result, &state, &request_id))
}
