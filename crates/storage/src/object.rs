//! Durable object storage backends.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::StorageError;

/// Upload contract used by the migration scheduler.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `key` and return the durable public URL.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (R2, MinIO).
    pub endpoint: Option<String>,
    /// Public base URL objects are served from; defaults to the AWS
    /// virtual-hosted URL.
    pub public_base_url: Option<String>,
    pub force_path_style: bool,
}

impl S3Config {
    /// Public URL for an uploaded key.
    pub fn public_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{key}", base.trim_end_matches('/')),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{key}",
                self.bucket, self.region
            ),
        }
    }
}

pub struct S3Storage {
    client: aws_sdk_s3::Client,
    config: S3Config,
}

impl S3Storage {
    /// Build a client from the ambient AWS credential chain.
    pub async fn connect(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        tracing::info!(bucket = %config.bucket, region = %config.region, "S3 storage configured");
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            config,
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!(key, size, "Object uploaded");
        Ok(self.config.public_url(key))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// A stored object held by [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// [`ObjectStorage`] kept in process memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryStorage {
    pub const BASE_URL: &'static str = "memory://durable";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.lock().get(key).cloned()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredObject>> {
        // A poisoned map still holds consistent entries; inserts are atomic.
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.lock().insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("{}/{key}", Self::BASE_URL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(public: Option<&str>) -> S3Config {
        S3Config {
            bucket: "atelier-results".to_string(),
            region: "eu-west-1".to_string(),
            endpoint: None,
            public_base_url: public.map(str::to_string),
            force_path_style: false,
        }
    }

    #[test]
    fn public_url_defaults_to_virtual_hosted_style() {
        assert_eq!(
            config(None).public_url("generations/a/a_0.png"),
            "https://atelier-results.s3.eu-west-1.amazonaws.com/generations/a/a_0.png"
        );
    }

    #[test]
    fn public_url_uses_configured_base() {
        assert_eq!(
            config(Some("https://cdn.example.com/")).public_url("k.png"),
            "https://cdn.example.com/k.png"
        );
    }

    #[tokio::test]
    async fn memory_storage_round_trips_objects() {
        let storage = MemoryStorage::new();
        let url = storage.upload(vec![1, 2, 3], "a/b.png", "image/png").await.unwrap();
        assert_eq!(url, "memory://durable/a/b.png");
        let stored = storage.get("a/b.png").unwrap();
        assert_eq!(stored.bytes, vec![1, 2, 3]);
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(storage.keys(), vec!["a/b.png".to_string()]);
    }
}
