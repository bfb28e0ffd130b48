use crate::error::ApiError;
use crate::handlers::image_response;
use crate::middleware::request_id::RequestId;
use crate::server::AppState;
use axum::Extension;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use pictor_core::{TransformOptions, cache_key, upstream, validate};
use pictor_pipeline::pipeline::{ProxyRequest, RequestMeta, UpstreamErrorMode};
use serde::Deserialize;

/// GET /api/v1/proxy — the explicit-URL route. Query: `url` (required) plus
/// the transform directives. Invalid transform values are silently dropped.
#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub w: Option<String>,
    #[serde(default)]
    pub h: Option<String>,
    #[serde(default)]
    pub fmt: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub fit: Option<String>,
}

impl ProxyParams {
    fn options(&self) -> TransformOptions {
        TransformOptions::from_query(
            self.w.as_deref(),
            self.h.as_deref(),
            self.fmt.as_deref(),
            self.q.as_deref(),
            self.fit.as_deref(),
        )
    }
}

pub async fn proxy_image(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Query(params): Query<ProxyParams>,
) -> Result<Response, ApiError> {
    let raw_url = params.url.clone().unwrap_or_default();
    validate::validate_url(&raw_url, &state.allowed)
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    // Structured parse is best-effort; an unrecognised shape still proxies
    // under its opaque base URL.
    let parsed = upstream::parse_upstream_url(&raw_url);
    let meta = RequestMeta {
        workspace_id: parsed.as_ref().map(|p| p.workspace_id.clone()),
        block_id: parsed.as_ref().map(|p| p.block_id.clone()),
    };
    let cache_base_url = parsed
        .as_ref()
        .map(|p| p.base_url.clone())
        .unwrap_or_else(|| cache_key::base_url(&raw_url));

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let result = state
        .pipeline
        .execute(ProxyRequest {
            cache_base_url,
            upstream_url: raw_url,
            options: params.options(),
            accept,
            meta,
            error_mode: UpstreamErrorMode::Relay,
        })
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    Ok(image_response(result, &state, &request_id))
}

/// Shared transform-parameter shape for routes that take no `url`.
#[derive(Debug, Deserialize)]
pub struct TransformParams {
    #[serde(default)]
    pub w: Option<String>,
    #[serde(default)]
    pub h: Option<String>,
    #[serde(default)]
    pub fmt: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub fit: Option<String>,
}

impl TransformParams {
    pub fn options(&self) -> TransformOptions {
        TransformOptions::from_query(
            self.w.as_deref(),
            self.h.as_deref(),
            self.fmt.as_deref(),
            self.q.as_deref(),
            self.fit.as_deref(),
        )
    }
}
