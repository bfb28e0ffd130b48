use crate::metadata::ImageMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use pictor_core::PictorError;

/// Bytes plus the metadata record stored beside them.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub bytes: Bytes,
    pub metadata: ImageMetadata,
}

/// The L3 tier: durable storage that outlives upstream signatures.
///
/// Unlike the edge cache, read failures here are real errors — except a
/// benign not-found, which is `Ok(None)`. Write failures after a successful
/// origin fetch are the caller's problem to log, not to surface.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredImage>, PictorError>;

    async fn put(&self, key: &str, bytes: Bytes, metadata: ImageMetadata)
    -> Result<(), PictorError>;

    async fn exists(&self, key: &str) -> Result<bool, PictorError>;

    async fn delete(&self, key: &str) -> Result<(), PictorError>;

    /// Remove every variant under `prefix`, returning how many entries went.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, PictorError>;

    async fn health_check(&self) -> bool;

    fn name(&self) -> &'static str;
}
