use crate::metadata::ImageMetadata;
use crate::storage::{StorageBackend, StoredImage};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use futures_util::future::join_all;
use pictor_core::PictorError;
use pictor_core::config::StorageConfig;
use tracing::{debug, warn};

/// Default key prefix inside the bucket.
const KEY_PREFIX: &str = "images/";
/// Probe key for health checks; a 404 on it still means the bucket answers.
const HEALTH_PROBE_KEY: &str = "images/.pictor-health";

/// S3-compatible persistent store. Cloudflare R2 is the same backend with a
/// custom endpoint and path-style addressing.
pub struct S3Storage {
    client: Client,
    bucket: String,
    backend_name: &'static str,
}

impl S3Storage {
    pub async fn from_config(cfg: &StorageConfig, backend_name: &'static str) -> anyhow::Result<Self> {
        let bucket = cfg
            .s3_bucket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("S3_BUCKET is not set"))?;
        let region = cfg.s3_region.clone().unwrap_or_else(|| "auto".to_string());

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region));
        if let (Some(access), Some(secret)) = (&cfg.s3_access_key, &cfg.s3_secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "pictor-config",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &cfg.s3_endpoint {
            builder = builder.endpoint_url(endpoint.as_str()).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
            backend_name,
        })
    }

    fn object_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }
}

fn storage_err(op: &str, err: impl std::fmt::Display) -> PictorError {
    PictorError::Storage(format!("s3 {op}: {err}"))
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn get(&self, key: &str) -> Result<Option<StoredImage>, PictorError> {
        let object = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .send()
            .await
        {
            Ok(object) => object,
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false);
                if not_found {
                    return Ok(None);
                }
                return Err(storage_err("get", aws_sdk_s3::error::DisplayErrorContext(err)));
            }
        };

        let content_type = object
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let mut metadata = object
            .metadata()
            .map(ImageMetadata::from_object_metadata)
            .unwrap_or_else(|| ImageMetadata::from_object_metadata(&Default::default()));
        if metadata.content_type.is_empty() {
            metadata.content_type = content_type;
        }
        // Read-stat updates would need a full object copy here; the update
        // is best-effort by contract, so the object store skips it.
        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| storage_err("read body", e))?
            .into_bytes();
        Ok(Some(StoredImage { bytes, metadata }))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: ImageMetadata,
    ) -> Result<(), PictorError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .content_type(metadata.content_type.clone())
            .set_metadata(Some(metadata.to_object_metadata()))
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| storage_err("put", aws_sdk_s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, PictorError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(storage_err("head", aws_sdk_s3::error::DisplayErrorContext(err)))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), PictorError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .send()
            .await
            .map_err(|e| storage_err("delete", aws_sdk_s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, PictorError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(Self::object_key(prefix))
            .into_paginator()
            .send();

        let mut removed = 0u64;
        while let Some(page) = pages.next().await {
            let page =
                page.map_err(|e| storage_err("list", aws_sdk_s3::error::DisplayErrorContext(e)))?;
            let keys: Vec<String> = page
                .contents()
                .iter()
                .filter_map(|obj| obj.key().map(String::from))
                .collect();
            if keys.is_empty() {
                continue;
            }
            let deletes = keys.iter().map(|k| {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(k)
                    .send()
            });
            for result in join_all(deletes).await {
                match result {
                    Ok(_) => removed += 1,
                    Err(e) => warn!(
                        error = %aws_sdk_s3::error::DisplayErrorContext(e),
                        "object delete failed during prefix purge"
                    ),
                }
            }
        }
        debug!(prefix = %prefix, removed, "prefix purge complete");
        Ok(removed)
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(HEALTH_PROBE_KEY)
            .send()
            .await
        {
            Ok(_) => true,
            Err(err) => err
                .as_service_error()
                .map(|e| e.is_not_found())
                .unwrap_or(false),
        }
    }

    fn name(&self) -> &'static str {
        self.backend_name
    }
}
