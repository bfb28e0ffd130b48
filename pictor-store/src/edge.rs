use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A volatile edge-cache entry. TTL is fixed when the entry is inserted.
#[derive(Debug, Clone)]
pub struct EdgeEntry {
    pub bytes: Bytes,
    pub content_type: String,
    pub cached_at: DateTime<Utc>,
}

impl EdgeEntry {
    pub fn new(bytes: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            cached_at: Utc::now(),
        }
    }
}

/// The L2 tier. Implementations are interchangeable and strictly
/// best-effort on the read path: a degraded edge cache turns every
/// operation into a miss or a no-op, never into a request failure.
#[async_trait]
pub trait EdgeCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<EdgeEntry>;

    async fn set(&self, key: &str, entry: EdgeEntry, ttl: Duration);

    async fn delete(&self, key: &str);

    /// Drop every entry whose key starts with `prefix` — the unit of
    /// invalidation for one source image.
    async fn delete_by_prefix(&self, prefix: &str);

    async fn health_check(&self) -> bool;

    fn name(&self) -> &'static str;
}
