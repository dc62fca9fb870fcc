//! HTTP client shared by all provider adapters.
//!
//! Wraps [`reqwest`] with Bearer authentication, a per-request timeout
//! and exponential-backoff retry for network-layer failures only. HTTP
//! error statuses are returned immediately as [`ProviderError::Http`].

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Default provider API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.kie.ai";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for a provider account.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

/// Tunable parameters for the network retry strategy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Whether a reqwest error happened before any HTTP response arrived.
fn is_network_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

/// Standard `{ code, msg, data }` envelope used by the provider API.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(alias = "message")]
    pub msg: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap `data`, turning a non-200 envelope code into an error.
    pub fn into_data(self) -> Result<T, ProviderError> {
        if self.code != 200 {
            return Err(ProviderError::Api {
                code: self.code,
                message: self.msg.unwrap_or_else(|| "unknown provider error".to_string()),
            });
        }
        self.data
            .ok_or_else(|| ProviderError::Malformed("envelope has no data".to_string()))
    }
}

/// HTTP client for one provider account.
pub struct ProviderHttpClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl ProviderHttpClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry: config.retry.clone(),
        }
    }

    /// `POST {base}{path}` with a JSON body, decoding a JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .send_with_retry(|| self.client.post(&url).bearer_auth(&self.api_key).json(body))
            .await?;
        Self::parse_response(response).await
    }

    /// `GET {base}{path}?{query}`, decoding a JSON response.
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .send_with_retry(|| self.client.get(&url).bearer_auth(&self.api_key).query(query))
            .await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Send a request, retrying only network-layer failures.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, ProviderError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => return Self::ensure_success(response).await,
                Err(e) if is_network_error(&e) && attempt <= self.retry.max_retries => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Provider request failed at network layer, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, &self.retry);
                }
                Err(e) if is_network_error(&e) => {
                    return Err(ProviderError::Network {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(ProviderError::Request(e)),
            }
        }
    }

    /// Ensure the response has a success status code.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(base_url: &str) -> ProviderHttpClient {
        let mut config = ProviderConfig::new(base_url, "test-key");
        config.retry = fast_retry();
        ProviderHttpClient::new(&config).unwrap()
    }

    #[test]
    fn next_delay_doubles_then_clamps() {
        let config = RetryConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
        assert_eq!(next_delay(Duration::from_secs(2), &config), Duration::from_secs(4));
        assert_eq!(next_delay(Duration::from_secs(8), &config), Duration::from_secs(8));
    }

    #[test]
    fn envelope_non_200_is_api_error() {
        let env: ApiEnvelope<serde_json::Value> =
            serde_json::from_str(r#"{"code":402,"msg":"insufficient balance"}"#).unwrap();
        assert_matches!(env.into_data(), Err(ProviderError::Api { code: 402, .. }));
    }

    #[tokio::test]
    async fn http_errors_are_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/fail",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
                }
            }),
        );
        let base = serve(router).await;

        let result: Result<serde_json::Value, _> = client_for(&base)
            .post_json("/fail", &serde_json::json!({}))
            .await;

        assert_matches!(result, Err(ProviderError::Http { status: 500, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_decodes_json() {
        let router = Router::new().route(
            "/ok",
            post(|| async { Json(serde_json::json!({"code": 200, "data": {"taskId": "t-1"}})) }),
        );
        let base = serve(router).await;

        let env: ApiEnvelope<serde_json::Value> = client_for(&base)
            .post_json("/ok", &serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(env.into_data().unwrap()["taskId"], "t-1");
    }

    #[tokio::test]
    async fn connection_refused_is_retried_then_reported() {
        // Bind then drop to obtain a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result: Result<serde_json::Value, _> = client_for(&format!("http://{addr}"))
            .get_json("/anything", &[])
            .await;

        assert_matches!(result, Err(ProviderError::Network { attempts: 4, .. }));
    }
}
