use std::sync::Arc;

use atelier_pipeline::kinds::{AvatarKind, ImageKind, VideoKind};
use atelier_pipeline::{
    JobQueries, MigrationScheduler, Orchestrator, PollingWorker, Reconciler, Services,
};
use atelier_storage::{ObjectStorage, SourceFetcher};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (every component is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub services: Arc<Services>,
    pub reconciler: Arc<Reconciler>,
    pub poller: Arc<PollingWorker>,
    pub migration: Arc<MigrationScheduler>,
    pub queries: Arc<JobQueries>,
    pub images: Arc<Orchestrator<ImageKind>>,
    pub videos: Arc<Orchestrator<VideoKind>>,
    pub avatars: Arc<Orchestrator<AvatarKind>>,
}

impl AppState {
    /// Wire every pipeline component around one set of services.
    pub fn new(
        config: ServerConfig,
        services: Arc<Services>,
        storage: Arc<dyn ObjectStorage>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&services)));
        Self {
            config: Arc::new(config),
            poller: Arc::new(PollingWorker::new(
                Arc::clone(&services),
                Arc::clone(&reconciler),
            )),
            migration: Arc::new(MigrationScheduler::new(
                Arc::clone(&services),
                storage,
                fetcher,
            )),
            queries: Arc::new(JobQueries::new(Arc::clone(&services))),
            images: Arc::new(Orchestrator::new(ImageKind, Arc::clone(&services))),
            videos: Arc::new(Orchestrator::new(VideoKind, Arc::clone(&services))),
            avatars: Arc::new(Orchestrator::new(AvatarKind, Arc::clone(&services))),
            reconciler,
            services,
        }
    }
}
