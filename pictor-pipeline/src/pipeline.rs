use crate::fetch::Fetcher;
use crate::flight::{FlightOutcome, FlightResult, FlightRole, SingleFlight};
use crate::optimize;
use bytes::Bytes;
use chrono::Utc;
use futures_util::FutureExt;
use pictor_core::{HostAllowlist, PictorError, TransformOptions, cache_key};
use pictor_store::{EdgeCache, EdgeEntry, ImageMetadata, StorageBackend, StoredImage};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Which tier produced the bytes. L1 is the browser; it never shows up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    L2Edge,
    L3Persistent,
    Origin,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::L2Edge => "L2_EDGE",
            CacheTier::L3Persistent => "L3_PERSISTENT",
            CacheTier::Origin => "ORIGIN",
        }
    }

    /// ORIGIN is the only miss; both cache tiers report a hit.
    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheTier::Origin)
    }
}

/// How fetcher errors are reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorMode {
    /// Relay the structured error with its HTTP status.
    Relay,
    /// Rewrite upstream 403/404/502 to `404 IMAGE_NOT_CACHED`. The stable
    /// path uses this: it cannot mint a signed URL, so a miss there means
    /// "prime the cache through the explicit-URL route first".
    CacheMiss,
}

/// Identifiers extracted from a recognised upstream URL, carried into the
/// persistent metadata record.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub workspace_id: Option<String>,
    pub block_id: Option<String>,
}

pub struct ProxyRequest {
    /// Identity for cache keying: the upstream URL minus its query string.
    pub cache_base_url: String,
    /// The URL actually fetched on a miss (signature included).
    pub upstream_url: String,
    pub options: TransformOptions,
    /// The client's Accept header, for format negotiation.
    pub accept: Option<String>,
    pub meta: RequestMeta,
    pub error_mode: UpstreamErrorMode,
}

#[derive(Debug)]
pub struct ProxyResponse {
    pub bytes: Bytes,
    pub content_type: String,
    pub tier: CacheTier,
    /// Upstream byte count before optimization; present only on ORIGIN.
    pub original_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub upstream_timeout: Duration,
    pub max_image_size: u64,
    pub edge_ttl: Duration,
}

/// The only component that sees all three tiers.
///
/// Probe order within a request is strict: edge, then persistent store,
/// then origin under the single-flight coordinator. Cache writes after a
/// successful fetch are detached tasks — they are not awaited, not
/// cancelled with the client, and their failures only get logged.
pub struct Pipeline {
    edge: Arc<dyn EdgeCache>,
    storage: Arc<dyn StorageBackend>,
    fetcher: Fetcher,
    flights: SingleFlight,
    allowed: Arc<HostAllowlist>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        edge: Arc<dyn EdgeCache>,
        storage: Arc<dyn StorageBackend>,
        fetcher: Fetcher,
        allowed: Arc<HostAllowlist>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            edge,
            storage,
            fetcher,
            flights: SingleFlight::new(),
            allowed,
            options,
        }
    }

    pub async fn execute(&self, req: ProxyRequest) -> Result<ProxyResponse, PictorError> {
        let options = req.options.negotiated(req.accept.as_deref());
        let key = cache_key::cache_key(&req.cache_base_url, &options);

        if let Some(hit) = self.edge.get(&key).await {
            debug!(key = %key, "edge cache hit");
            return Ok(ProxyResponse {
                bytes: hit.bytes,
                content_type: hit.content_type,
                tier: CacheTier::L2Edge,
                original_size: None,
            });
        }

        match self.storage.get(&key).await {
            Ok(Some(stored)) => {
                debug!(key = %key, "persistent store hit");
                self.backfill_edge(&key, &stored);
                return Ok(ProxyResponse {
                    bytes: stored.bytes,
                    content_type: stored.metadata.content_type,
                    tier: CacheTier::L3Persistent,
                    original_size: None,
                });
            }
            Ok(None) => {}
            Err(e) => return Err(map_error(e, req.error_mode)),
        }

        match self.flights.join(&key) {
            FlightRole::Leader(tx) => {
                let result = self.lead(&key, tx, &req, options).await;
                match result {
                    Ok(outcome) => Ok(ProxyResponse {
                        bytes: outcome.bytes,
                        content_type: outcome.content_type,
                        tier: CacheTier::Origin,
                        original_size: Some(outcome.original_size),
                    }),
                    Err(e) => Err(map_error(e, req.error_mode)),
                }
            }
            FlightRole::Follower(rx) => {
                debug!(key = %key, "coalesced onto in-flight origin fetch");
                match SingleFlight::wait(rx).await {
                    // A follower effectively got an in-memory hit off the
                    // leader's buffer.
                    Ok(shared) => Ok(ProxyResponse {
                        bytes: shared.bytes,
                        content_type: shared.content_type,
                        tier: CacheTier::L2Edge,
                        original_size: None,
                    }),
                    Err(e) => Err(map_error(e, req.error_mode)),
                }
            }
        }
    }

    /// Purge every variant of one image from both cache tiers.
    pub async fn purge(&self, base_url: &str) -> Result<u64, PictorError> {
        let prefix = cache_key::cache_prefix(base_url);
        self.edge.delete_by_prefix(&prefix).await;
        let removed = self
            .storage
            .delete_by_prefix(&prefix)
            .await
            .map_err(|e| PictorError::PurgeFailed(e.to_string()))?;
        info!(prefix = %prefix, removed, "cache purged");
        Ok(removed)
    }

    /// Run the origin work on a detached task so a client disconnect cannot
    /// abort it mid-flight (followers may still want the result), and so the
    /// outcome is always published no matter what happens to this caller.
    async fn lead(
        &self,
        key: &str,
        tx: watch::Sender<Option<FlightResult>>,
        req: &ProxyRequest,
        options: TransformOptions,
    ) -> FlightResult {
        let job = OriginJob {
            fetcher: self.fetcher.clone(),
            allowed: Arc::clone(&self.allowed),
            storage: Arc::clone(&self.storage),
            edge: Arc::clone(&self.edge),
            options: self.options.clone(),
            key: key.to_string(),
            upstream_url: req.upstream_url.clone(),
            cache_base_url: req.cache_base_url.clone(),
            meta: req.meta.clone(),
            transform: options,
        };
        let flights = self.flights.clone();
        let task_key = key.to_string();

        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(job.run())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(PictorError::Internal("origin task panicked".to_string()))
                });
            flights.complete(&task_key, &tx, result.clone());
            result
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                self.flights.abandon(key);
                Err(PictorError::Internal(format!("origin task failed: {e}")))
            }
        }
    }

    /// L3 hit → refresh L2 asynchronously. Fire-and-forget.
    fn backfill_edge(&self, key: &str, stored: &StoredImage) {
        let edge = Arc::clone(&self.edge);
        let key = key.to_string();
        let entry = EdgeEntry {
            bytes: stored.bytes.clone(),
            content_type: stored.metadata.content_type.clone(),
            cached_at: Utc::now(),
        };
        let ttl = self.options.edge_ttl;
        tokio::spawn(async move {
            edge.set(&key, entry, ttl).await;
        });
    }
}

fn map_error(err: PictorError, mode: UpstreamErrorMode) -> PictorError {
    match mode {
        UpstreamErrorMode::Relay => err,
        UpstreamErrorMode::CacheMiss => match err.status_code() {
            403 | 404 | 502 => PictorError::ImageNotCached,
            _ => err,
        },
    }
}

/// Everything the leader's detached task needs, owned.
struct OriginJob {
    fetcher: Fetcher,
    allowed: Arc<HostAllowlist>,
    storage: Arc<dyn StorageBackend>,
    edge: Arc<dyn EdgeCache>,
    options: PipelineOptions,
    key: String,
    upstream_url: String,
    cache_base_url: String,
    meta: RequestMeta,
    transform: TransformOptions,
}

impl OriginJob {
    async fn run(self) -> FlightResult {
        let fetched = self
            .fetcher
            .fetch(
                &self.upstream_url,
                self.options.upstream_timeout,
                self.options.max_image_size,
                &self.allowed,
            )
            .await?;

        // Decode/encode is CPU work — off the async threads. Any optimizer
        // failure falls back to the original bytes; the image still serves.
        let optimized = {
            let bytes = fetched.bytes.clone();
            let transform = self.transform.clone();
            match tokio::task::spawn_blocking(move || optimize::optimize(&bytes, &transform)).await
            {
                Ok(Ok(out)) => Some(out),
                Ok(Err(e)) => {
                    warn!(key = %self.key, error = %e, "optimizer failed, serving original bytes");
                    None
                }
                Err(e) => {
                    warn!(key = %self.key, error = %e, "optimizer task failed, serving original bytes");
                    None
                }
            }
        };
        let (bytes, content_type, width, height) = match optimized {
            Some(o) => (o.bytes, o.content_type, Some(o.width), Some(o.height)),
            None => (fetched.bytes.clone(), fetched.content_type.clone(), None, None),
        };

        let now = Utc::now();
        let metadata = ImageMetadata {
            original_url: self.cache_base_url.clone(),
            content_type: content_type.clone(),
            original_size: fetched.original_size,
            cached_size: bytes.len() as u64,
            width,
            height,
            workspace_id: self.meta.workspace_id.clone(),
            block_id: self.meta.block_id.clone(),
            cached_at: now,
            last_accessed_at: now,
            access_count: 0,
        };

        // Detached writes: the response never waits on either tier.
        {
            let storage = Arc::clone(&self.storage);
            let key = self.key.clone();
            let bytes = bytes.clone();
            let metadata = metadata.clone();
            tokio::spawn(async move {
                if let Err(e) = storage.put(&key, bytes, metadata).await {
                    warn!(
                        key = %key,
                        error = %e,
                        degraded = "infrastructure_degraded",
                        "persistent store write failed"
                    );
                }
            });
        }
        {
            let edge = Arc::clone(&self.edge);
            let key = self.key.clone();
            let entry = EdgeEntry {
                bytes: bytes.clone(),
                content_type: content_type.clone(),
                cached_at: now,
            };
            let ttl = self.options.edge_ttl;
            tokio::spawn(async move {
                edge.set(&key, entry, ttl).await;
            });
        }

        info!(
            key = %self.key,
            original_size = fetched.original_size,
            optimized_size = bytes.len(),
            "origin fetch complete"
        );
        Ok(FlightOutcome {
            bytes,
            content_type,
            original_size: fetched.original_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_strings_match_the_wire_format() {
        assert_eq!(CacheTier::L2Edge.as_str(), "L2_EDGE");
        assert_eq!(CacheTier::L3Persistent.as_str(), "L3_PERSISTENT");
        assert_eq!(CacheTier::Origin.as_str(), "ORIGIN");
        assert!(CacheTier::L2Edge.is_hit());
        assert!(CacheTier::L3Persistent.is_hit());
        assert!(!CacheTier::Origin.is_hit());
    }

    #[test]
    fn cache_miss_mode_rewrites_upstream_failures() {
        for err in [
            PictorError::Upstream { status: 404 },
            PictorError::Upstream { status: 502 },
            PictorError::FetchFailed("refused".into()),
            PictorError::RedirectBlocked("127.0.0.1".into()),
        ] {
            assert_eq!(
                map_error(err, UpstreamErrorMode::CacheMiss),
                PictorError::ImageNotCached
            );
        }
    }

    #[test]
    fn cache_miss_mode_leaves_other_errors_alone() {
        assert_eq!(
            map_error(PictorError::UpstreamTimeout, UpstreamErrorMode::CacheMiss),
            PictorError::UpstreamTimeout
        );
        assert_eq!(
            map_error(PictorError::ImageTooLarge, UpstreamErrorMode::CacheMiss),
            PictorError::ImageTooLarge
        );
    }

    #[test]
    fn relay_mode_is_transparent() {
        let err = PictorError::Upstream { status: 502 };
        assert_eq!(map_error(err.clone(), UpstreamErrorMode::Relay), err);
    }
}
