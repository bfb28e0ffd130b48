use crate::metadata::ImageMetadata;
use crate::storage::{StorageBackend, StoredImage};
use async_trait::async_trait;
use bytes::Bytes;
use pictor_core::PictorError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Local-filesystem persistent store.
///
/// Layout: `<root>/<key[0..2]>/<sanitised key[2..]>.{bin,json}` — the
/// two-character shard keeps directories small, and sanitisation maps every
/// character outside `[A-Za-z0-9_-]` (including `/`) to `_` so one key is
/// exactly one file pair and no key can traverse out of the root.
pub struct FsStorage {
    root: PathBuf,
}

/// Replace path-hostile characters. `/` collapses into `_` as well, so the
/// variant separator never creates extra directories.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl FsStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, PictorError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| PictorError::Storage(format!("create cache dir: {e}")))?;
        Ok(Self { root })
    }

    fn split_shard(key: &str) -> (&str, &str) {
        if key.len() > 2 {
            key.split_at(2)
        } else {
            ("__", key)
        }
    }

    fn shard_dir(&self, key: &str) -> PathBuf {
        let (shard, _) = Self::split_shard(key);
        self.root.join(sanitize_key(shard))
    }

    fn pair_paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let (shard, rest) = Self::split_shard(key);
        let dir = self.root.join(sanitize_key(shard));
        let stem = sanitize_key(rest);
        (dir.join(format!("{stem}.bin")), dir.join(format!("{stem}.json")))
    }

    /// Best-effort read-stat update; never blocks or fails the read.
    fn touch_metadata(json_path: PathBuf, mut metadata: ImageMetadata) {
        metadata.touch();
        tokio::spawn(async move {
            match serde_json::to_vec(&metadata) {
                Ok(buf) => {
                    if let Err(e) = tokio::fs::write(&json_path, buf).await {
                        debug!(path = %json_path.display(), error = %e, "metadata touch failed");
                    }
                }
                Err(e) => debug!(error = %e, "metadata serialize failed"),
            }
        });
    }
}

fn io_storage_err(what: &str, path: &Path, e: std::io::Error) -> PictorError {
    PictorError::Storage(format!("{what} {}: {e}", path.display()))
}

#[async_trait]
impl StorageBackend for FsStorage {
    async fn get(&self, key: &str) -> Result<Option<StoredImage>, PictorError> {
        let (bin, json) = self.pair_paths(key);
        let bytes = match tokio::fs::read(&bin).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_storage_err("read", &bin, e)),
        };
        let meta_buf = match tokio::fs::read(&json).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Half a pair is not an entry.
                return Ok(None);
            }
            Err(e) => return Err(io_storage_err("read", &json, e)),
        };
        let metadata: ImageMetadata = match serde_json::from_slice(&meta_buf) {
            Ok(m) => m,
            Err(e) => {
                warn!(key = %key, error = %e, "corrupt metadata sidecar, treating as miss");
                return Ok(None);
            }
        };
        Self::touch_metadata(json, metadata.clone());
        Ok(Some(StoredImage {
            bytes: Bytes::from(bytes),
            metadata,
        }))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: ImageMetadata,
    ) -> Result<(), PictorError> {
        let (bin, json) = self.pair_paths(key);
        let dir = self.shard_dir(key);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_storage_err("create", &dir, e))?;
        let meta_buf = serde_json::to_vec(&metadata)
            .map_err(|e| PictorError::Storage(format!("serialize metadata: {e}")))?;
        // The pair is written concurrently; atomicity across the two files
        // is not part of the contract.
        let (a, b) = tokio::join!(
            tokio::fs::write(&bin, bytes.as_ref()),
            tokio::fs::write(&json, meta_buf),
        );
        a.map_err(|e| io_storage_err("write", &bin, e))?;
        b.map_err(|e| io_storage_err("write", &json, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, PictorError> {
        let (bin, _) = self.pair_paths(key);
        Ok(tokio::fs::try_exists(&bin).await.unwrap_or(false))
    }

    async fn delete(&self, key: &str) -> Result<(), PictorError> {
        let (bin, json) = self.pair_paths(key);
        for path in [bin, json] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_storage_err("remove", &path, e)),
            }
        }
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, PictorError> {
        let (_, rest) = Self::split_shard(prefix);
        let dir = self.shard_dir(prefix);
        let stem_prefix = sanitize_key(rest);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_storage_err("list", &dir, e)),
        };
        let mut removed = 0u64;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| io_storage_err("list", &dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(stem_prefix.as_str()) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) if name.ends_with(".bin") => removed += 1,
                Ok(()) => {}
                Err(e) => warn!(path = %entry.path().display(), error = %e, "purge failed"),
            }
        }
        Ok(removed)
    }

    async fn health_check(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}
