//! Downloading ephemeral provider URLs.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

/// Default ceiling on a single downloaded source (200 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 200 * 1024 * 1024;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// A downloaded source object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedObject, StorageError>;
}

/// [`SourceFetcher`] over plain HTTP(S).
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(max_bytes: u64) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self { client, max_bytes })
    }

    /// Create a fetcher reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedObject, StorageError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::SourceStatus(status.as_u16()));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(StorageError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Content-Length may be absent or wrong; enforce the cap while streaming.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(StorageError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(StorageError::Empty);
        }

        Ok(FetchedObject {
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    use super::*;

    async fn serve() -> String {
        let app = Router::new()
            .route("/ok.png", get(|| async { ([("content-type", "image/png")], vec![7u8; 64]) }))
            .route("/big.bin", get(|| async { vec![0u8; 4096] }))
            .route("/empty", get(|| async { Vec::<u8>::new() }))
            .route("/gone", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn fetches_body_and_content_type() {
        let base = serve().await;
        let fetched = HttpFetcher::new(1024).unwrap().fetch(&format!("{base}/ok.png")).await.unwrap();
        assert_eq!(fetched.bytes.len(), 64);
        assert_eq!(fetched.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn rejects_oversized_empty_and_missing_sources() {
        let base = serve().await;
        let fetcher = HttpFetcher::new(1024).unwrap();
        assert_matches!(
            fetcher.fetch(&format!("{base}/big.bin")).await,
            Err(StorageError::TooLarge { limit: 1024 })
        );
        assert_matches!(fetcher.fetch(&format!("{base}/empty")).await, Err(StorageError::Empty));
        assert_matches!(
            fetcher.fetch(&format!("{base}/gone")).await,
            Err(StorageError::SourceStatus(404))
        );
    }
}
