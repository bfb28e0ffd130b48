use crate::error::ApiError;
use crate::middleware::request_id::RequestId;
use crate::server::AppState;
use axum::Extension;
use axum::extract::{Query, State};
use axum::response::Json;
use pictor_core::{PictorError, cache_key, validate};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct PurgeParams {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub page_id: Option<String>,
}

/// DELETE /api/v1/cache?url=… — purge every variant of one image from both
/// cache tiers. Purge by page_id is declared but not implemented.
pub async fn purge_cache(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(params): Query<PurgeParams>,
) -> Result<Json<Value>, ApiError> {
    let fail = |e: PictorError| ApiError::new(e, request_id.clone());

    let Some(raw_url) = params.url.as_deref().filter(|u| !u.is_empty()) else {
        if params.page_id.is_some() {
            return Err(fail(PictorError::NotImplemented(
                "cache purge by page_id".to_string(),
            )));
        }
        return Err(fail(PictorError::MissingParams("url".to_string())));
    };

    validate::validate_url(raw_url, &state.allowed).map_err(&fail)?;
    let base_url = cache_key::base_url(raw_url);
    let removed = state.pipeline.purge(&base_url).await.map_err(&fail)?;

    Ok(Json(json!({
        "purged": true,
        "variantsRemoved": removed,
        "requestId": request_id,
    })))
}
