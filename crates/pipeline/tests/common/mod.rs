//! Shared fixtures for pipeline integration tests: a scriptable provider,
//! a scriptable source fetcher and a harness wired to the in-memory
//! backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atelier_core::authority::InternalAuthority;
use atelier_core::job::{GenerationJob, ResultAsset};
use atelier_core::task_state::{CompletionSignal, ErrorCode, SignalSource, TaskState};
use atelier_core::types::{new_id, DbId};
use atelier_pipeline::kinds::image::{ImageKind, ImageRequest};
use atelier_pipeline::kinds::CostOverride;
use atelier_pipeline::store::{CreditLedger, JobStore, MemoryBackend};
use atelier_pipeline::{
    CreatedJob, Orchestrator, PipelineConfig, PipelineError, ReconcileOutcome, Reconciler,
    Services,
};
use atelier_providers::registry::{GPT_IMAGE_ROUTES, JOBS_API_ROUTES, VEO_ROUTES};
use atelier_providers::{CreatedTask, ProviderAdapter, ProviderError, ProviderRegistry, TaskRequest, TaskSnapshot};
use atelier_storage::{FetchedObject, SourceFetcher, StorageError};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Scripted answer to `query_task`.
#[derive(Debug, Clone)]
pub enum Reply {
    State {
        state: TaskState,
        urls: Vec<String>,
        reason: Option<String>,
    },
    NetworkError,
    HttpError(u16),
}

impl Reply {
    pub fn success(urls: &[&str]) -> Self {
        Self::State {
            state: TaskState::Success,
            urls: urls.iter().map(|u| u.to_string()).collect(),
            reason: None,
        }
    }

    pub fn state(state: TaskState) -> Self {
        Self::State {
            state,
            urls: Vec::new(),
            reason: None,
        }
    }
}

/// In-process provider standing in for every adapter.
#[derive(Default)]
pub struct FakeProvider {
    next_id: AtomicU32,
    reject_next_create: Mutex<Option<u16>>,
    created: Mutex<Vec<(TaskRequest, String)>>,
    replies: Mutex<HashMap<String, Reply>>,
    queries: AtomicU32,
}

impl FakeProvider {
    /// Make the next `create_task` fail with an HTTP error status.
    pub fn reject_next_create(&self, status: u16) {
        *self.reject_next_create.lock().unwrap() = Some(status);
    }

    pub fn set_reply(&self, remote_task_id: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(remote_task_id.to_string(), reply);
    }

    /// Requests and callback URLs passed to `create_task`, in order.
    pub fn created(&self) -> Vec<(TaskRequest, String)> {
        self.created.lock().unwrap().clone()
    }

    pub fn query_count(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_task(
        &self,
        request: &TaskRequest,
        callback_url: &str,
    ) -> Result<CreatedTask, ProviderError> {
        if let Some(status) = self.reject_next_create.lock().unwrap().take() {
            return Err(ProviderError::Http {
                status,
                body: "upstream rejected the task".into(),
            });
        }
        self.created
            .lock()
            .unwrap()
            .push((request.clone(), callback_url.to_string()));
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
        self.queries.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(remote_task_id)
            .cloned()
            .unwrap_or_else(|| Reply::state(TaskState::Waiting));
        match reply {
            Reply::State { state, urls, reason } => Ok(TaskSnapshot {
                remote_task_id: remote_task_id.to_string(),
                state,
                result_urls: urls,
                fail_reason: reason,
            }),
            Reply::NetworkError => Err(ProviderError::Network {
                attempts: 4,
                message: "connection reset by peer".into(),
            }),
            Reply::HttpError(status) => Err(ProviderError::Http {
                status,
                body: "internal error".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Source fetcher
// ---------------------------------------------------------------------------

/// Serves registered URLs; everything else is a 404.
#[derive(Default)]
pub struct FakeFetcher {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    attempts: Mutex<HashMap<String, u32>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeFetcher {
    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn attempts(&self, url: &str) -> u32 {
        self.attempts.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    /// Block every fetch until the returned handle is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedObject, StorageError> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        match self.objects.lock().unwrap().get(url) {
            Some(bytes) => Ok(FetchedObject {
                bytes: bytes.clone(),
                content_type: None,
            }),
            None => Err(StorageError::SourceStatus(404)),
        }
    }
}

/// A small solid-colour PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgba([30u8, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.migration.retry_delay = Duration::from_millis(1);
    config
}

pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub provider: Arc<FakeProvider>,
    pub services: Arc<Services>,
    pub reconciler: Arc<Reconciler>,
    pub owner: DbId,
}

impl Harness {
    /// A harness whose owner starts with `balance` credits.
    pub async fn new(balance: i32) -> Self {
        Self::with_config(balance, test_config()).await
    }

    pub async fn with_config(balance: i32, config: PipelineConfig) -> Self {
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
            config,
        );
        let reconciler = Arc::new(Reconciler::new(services.clone()));

        let owner = new_id();
        if balance > 0 {
            backend.grant(owner, balance, Some("test top-up")).await.unwrap();
        }

        Self {
            backend,
            provider,
            services,
            reconciler,
            owner,
        }
    }

    pub fn images(&self) -> Orchestrator<ImageKind> {
        Orchestrator::new(ImageKind, self.services.clone())
    }

    /// Create a catalog-priced `google/nano-banana` job.
    pub async fn create_image(&self, count: u32) -> Result<CreatedJob, PipelineError> {
        self.images()
            .create(self.owner, image_request("google/nano-banana", count), None)
            .await
    }

    /// Create an image job whose cost is fixed by an internal override.
    pub async fn create_with_cost(&self, credits: i32) -> CreatedJob {
        let cost = CostOverride {
            credits,
            authority: InternalAuthority::system(),
        };
        self.images()
            .create(self.owner, image_request("google/nano-banana", 1), Some(cost))
            .await
            .unwrap()
    }

    pub async fn balance(&self) -> i32 {
        self.backend.balance(self.owner).await.unwrap()
    }

    pub async fn job(&self, id: DbId) -> GenerationJob {
        self.backend.find(id).await.unwrap().expect("job exists")
    }

    pub async fn assets(&self, id: DbId) -> Vec<ResultAsset> {
        self.backend.list_assets(id).await.unwrap()
    }

    pub async fn job_count(&self) -> i64 {
        self.backend.count_by_owner(self.owner).await.unwrap()
    }

    pub async fn succeed(
        &self,
        remote_task_id: &str,
        urls: &[&str],
        source: SignalSource,
    ) -> ReconcileOutcome {
        let signal = CompletionSignal::Success {
            result_urls: urls.iter().map(|u| u.to_string()).collect(),
        };
        self.reconciler
            .reconcile(remote_task_id, &signal, source)
            .await
            .unwrap()
    }

    pub async fn fail(&self, remote_task_id: &str, reason: &str, source: SignalSource) -> ReconcileOutcome {
        let signal = CompletionSignal::Failure {
            code: ErrorCode::GenerationFailed,
            reason: Some(reason.to_string()),
        };
        self.reconciler
            .reconcile(remote_task_id, &signal, source)
            .await
            .unwrap()
    }
}

pub fn image_request(model_id: &str, count: u32) -> ImageRequest {
    ImageRequest {
        model_id: model_id.to_string(),
        prompt: "a lighthouse at dusk, volumetric fog".to_string(),
        count,
        aspect_ratio: Some("16:9".to_string()),
        resolution: None,
        reference_urls: Vec::new(),
        style_preset: None,
    }
}
