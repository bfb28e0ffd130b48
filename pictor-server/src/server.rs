use crate::handlers;
use crate::middleware::rate_limit::{self, RateLimiter};
use crate::middleware::{access_log, api_key, request_id, security_headers};
use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get};
use pictor_core::config::StorageBackendKind;
use pictor_core::{HostAllowlist, PictorConfig};
use pictor_pipeline::fetch::Fetcher;
use pictor_pipeline::pipeline::{Pipeline, PipelineOptions};
use pictor_store::{
    EdgeCache, FsStorage, MemoryEdgeCache, RedisEdgeCache, S3Storage, StorageBackend,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{self, CorsLayer};
use tracing::{info, warn};

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PictorConfig>,
    pub pipeline: Arc<Pipeline>,
    pub storage: Arc<dyn StorageBackend>,
    pub edge: Arc<dyn EdgeCache>,
    pub allowed: Arc<HostAllowlist>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// Wire up the storage backend, edge cache and pipeline from configuration.
/// Backend misconfiguration is fatal here; a degraded edge cache is not.
pub async fn build_state(config: PictorConfig) -> anyhow::Result<AppState> {
    let storage: Arc<dyn StorageBackend> = match config.storage.backend {
        StorageBackendKind::Fs => {
            Arc::new(FsStorage::new(config.storage.cache_dir.clone()).await?)
        }
        StorageBackendKind::S3 => Arc::new(S3Storage::from_config(&config.storage, "s3").await?),
        StorageBackendKind::R2 => Arc::new(S3Storage::from_config(&config.storage, "r2").await?),
    };
    info!(backend = storage.name(), "persistent store ready");

    let edge: Arc<dyn EdgeCache> = match &config.edge.redis_url {
        Some(url) => match RedisEdgeCache::connect(url).await {
            Ok(cache) => {
                info!("edge cache: redis");
                Arc::new(cache)
            }
            Err(e) => {
                // The edge tier is best-effort; a dead Redis must not take
                // the service down with it.
                warn!(error = %e, "redis unreachable, falling back to in-process edge cache");
                Arc::new(memory_edge(&config))
            }
        },
        None => Arc::new(memory_edge(&config)),
    };

    let allowed = Arc::new(HostAllowlist::new(&config.upstream.allowed_domains));
    let pipeline = Pipeline::new(
        Arc::clone(&edge),
        Arc::clone(&storage),
        Fetcher::new()?,
        Arc::clone(&allowed),
        PipelineOptions {
            upstream_timeout: Duration::from_millis(config.upstream.timeout_ms),
            max_image_size: config.upstream.max_image_size_bytes,
            edge_ttl: Duration::from_secs(config.edge.ttl_secs),
        },
    );

    let rate_limiter = Arc::new(RateLimiter::new(config.http.rate_limit_per_minute));

    Ok(AppState {
        config: Arc::new(config),
        pipeline: Arc::new(pipeline),
        storage,
        edge,
        allowed,
        rate_limiter,
    })
}

fn memory_edge(config: &PictorConfig) -> MemoryEdgeCache {
    MemoryEdgeCache::new(config.edge.max_entries, config.edge.max_bytes as usize)
}

/// Assemble the router. Layer order (outermost first): request-id, access
/// log, CORS, security headers; rate limiting covers the image and API
/// routes, the API-key gate covers /api/v1 only, and /health sits outside
/// both.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/proxy", get(handlers::proxy::proxy_image))
        .route("/cache", delete(handlers::cache::purge_cache))
        .route("/stats", get(handlers::stats::stats))
        .route_layer(from_fn_with_state(state.clone(), api_key::require_api_key));

    let limited = Router::new()
        .nest("/api/v1", api)
        .route(
            "/img/{workspace_id}/{block_id}/{filename}",
            get(handlers::stable::stable_image),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            rate_limit::enforce_rate_limit,
        ));

    Router::new()
        .merge(limited)
        .route("/health", get(handlers::health::health))
        .layer(from_fn(security_headers::add_security_headers))
        .layer(cors_layer(&state.config))
        .layer(from_fn(access_log::log_requests))
        .layer(from_fn(request_id::assign_request_id))
        .with_state(state)
}

fn cors_layer(config: &PictorConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::DELETE])
        .allow_headers(cors::Any);
    if config.http.cors_origins.iter().any(|o| o == "*") {
        layer.allow_origin(cors::Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .http
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}
