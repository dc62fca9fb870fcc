//! Shared fixtures for API integration tests: the production router wired
//! to the in-memory backend and a scriptable provider.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use atelier_api::auth::jwt::{generate_access_token, JwtConfig};
use atelier_api::auth::ROLE_ADMIN;
use atelier_api::config::ServerConfig;
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;
use atelier_core::task_state::TaskState;
use atelier_core::types::{new_id, DbId};
use atelier_pipeline::store::{CreditLedger, MemoryBackend};
use atelier_pipeline::{PipelineConfig, Services};
use atelier_providers::client::ProviderConfig;
use atelier_providers::registry::{GPT_IMAGE_ROUTES, JOBS_API_ROUTES, VEO_ROUTES};
use atelier_providers::{
    CreatedTask, ProviderAdapter, ProviderError, ProviderRegistry, TaskRequest, TaskSnapshot,
};
use atelier_storage::{FetchedObject, MemoryStorage, SourceFetcher, StorageError};
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

pub const INTERNAL_SECRET: &str = "internal-test-secret";

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Provider that accepts every task as `task-{n}` and answers queries
/// from a scripted table.
#[derive(Default)]
pub struct FakeProvider {
    next_id: AtomicU32,
    reject_next_create: Mutex<bool>,
    callbacks: Mutex<Vec<String>>,
    snapshots: Mutex<HashMap<String, (TaskState, Vec<String>)>>,
}

impl FakeProvider {
    pub fn reject_next_create(&self) {
        *self.reject_next_create.lock().unwrap() = true;
    }

    pub fn set_state(&self, remote_task_id: &str, state: TaskState, urls: &[&str]) {
        self.snapshots.lock().unwrap().insert(
            remote_task_id.to_string(),
            (state, urls.iter().map(|u| u.to_string()).collect()),
        );
    }

    /// Webhook token handed to the provider with the n-th created task.
    pub fn token(&self, n: usize) -> String {
        let callbacks = self.callbacks.lock().unwrap();
        let url = &callbacks[n - 1];
        url.split("token=").nth(1).expect("callback URL has a token").to_string()
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_task(
        &self,
        _request: &TaskRequest,
        callback_url: &str,
    ) -> Result<CreatedTask, ProviderError> {
        if std::mem::take(&mut *self.reject_next_create.lock().unwrap()) {
            return Err(ProviderError::Http {
                status: 422,
                body: "prompt rejected".into(),
            });
        }
        self.callbacks.lock().unwrap().push(callback_url.to_string());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedTask {
            remote_task_id: format!("task-{n}"),
        })
    }

    async fn query_task(
        &self,
        _model: &str,
        remote_task_id: &str,
    ) -> Result<TaskSnapshot, ProviderError> {
        let (state, urls) = self
            .snapshots
            .lock()
            .unwrap()
            .get(remote_task_id)
            .cloned()
            .unwrap_or((TaskState::Waiting, Vec::new()));
        Ok(TaskSnapshot {
            remote_task_id: remote_task_id.to_string(),
            state,
            result_urls: urls,
            fail_reason: None,
        })
    }
}

/// Fetcher whose downloads never finish, keeping a sweep in flight.
pub struct StalledFetcher;

#[async_trait]
impl SourceFetcher for StalledFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchedObject, StorageError> {
        std::future::pending().await
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            access_token_expiry_mins: 15,
        },
        internal_api_secret: Some(INTERNAL_SECRET.to_string()),
        public_base_url: "http://localhost:3000".to_string(),
        provider: ProviderConfig::new("http://provider.invalid", "test-key"),
        pipeline: PipelineConfig::default(),
        storage: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub backend: Arc<MemoryBackend>,
    pub provider: Arc<FakeProvider>,
    /// A regular user with a funded balance.
    pub user: DbId,
    pub user_token: String,
    pub admin_token: String,
}

impl TestApp {
    /// App whose regular user starts with `balance` credits.
    pub async fn new(balance: i32) -> Self {
        let config = test_config();
        let backend = Arc::new(MemoryBackend::new());
        let provider = Arc::new(FakeProvider::default());

        let mut registry = ProviderRegistry::new();
        registry.register_all(JOBS_API_ROUTES, provider.clone());
        registry.register_all(GPT_IMAGE_ROUTES, provider.clone());
        registry.register_all(VEO_ROUTES, provider.clone());

        let services = Services::new(
            backend.clone(),
            backend.clone(),
            Arc::new(registry),
            config.pipeline.clone(),
        );
        let user = new_id();
        if balance > 0 {
            backend.grant(user, balance, Some("test top-up")).await.unwrap();
        }

        let user_token = generate_access_token(user, "user", &config.jwt).unwrap();
        let admin_token = generate_access_token(new_id(), ROLE_ADMIN, &config.jwt).unwrap();

        let state = AppState::new(
            config,
            services,
            Arc::new(MemoryStorage::new()),
            Arc::new(StalledFetcher),
        );

        Self {
            router: build_app_router(state.clone()),
            state,
            backend,
            provider,
            user,
            user_token,
            admin_token,
        }
    }

    /// Token for another, unrelated user.
    pub fn stranger_token(&self) -> String {
        generate_access_token(new_id(), "user", &self.state.config.jwt).unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, token: &str) -> Response<Body> {
        self.send(authed(Method::GET, uri, token, None)).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> Response<Body> {
        self.send(authed(Method::POST, uri, token, Some(body))).await
    }

    /// Create a one-image `google/nano-banana` job as the regular user.
    pub async fn create_image(&self) -> Value {
        let response = self
            .post("/api/v1/generations", &self.user_token, image_body())
            .await;
        assert_eq!(response.status(), 201);
        body_json(response).await
    }

    pub async fn balance(&self) -> i32 {
        self.backend.balance(self.user).await.unwrap()
    }
}

pub fn image_body() -> Value {
    serde_json::json!({
        "job_type": "image",
        "model_id": "google/nano-banana",
        "prompt": "a lighthouse at dusk",
        "aspect_ratio": "16:9",
    })
}

/// Jobs API callback body.
pub fn callback(task_id: &str, state: &str, urls: &[&str]) -> Value {
    let result_json = serde_json::json!({ "resultUrls": urls }).to_string();
    serde_json::json!({
        "code": 200,
        "msg": "success",
        "data": {
            "taskId": task_id,
            "state": state,
            "resultJson": result_json,
            "failMsg": if state == "fail" { "content policy violation" } else { "" },
        }
    })
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub fn authed(method: Method, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn unauthed_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Send a GET request without credentials.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
