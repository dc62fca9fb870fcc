use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use atelier_pipeline::store::PgStore;
use atelier_pipeline::Services;
use atelier_providers::client::ProviderHttpClient;
use atelier_providers::ProviderRegistry;
use atelier_storage::fetch::DEFAULT_MAX_BYTES;
use atelier_storage::{HttpFetcher, MemoryStorage, ObjectStorage, S3Storage};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier_api::background::BackgroundTasks;
use atelier_api::config::ServerConfig;
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier_api=debug,atelier_pipeline=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = atelier_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    atelier_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    atelier_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let store = Arc::new(PgStore::new(pool));

    // --- Providers ---
    let client = ProviderHttpClient::new(&config.provider).context("Failed to build provider client")?;
    let registry = Arc::new(ProviderRegistry::standard(Arc::new(client)));
    tracing::info!(models = registry.model_ids().count(), "Provider registry ready");

    let services = Services::new(
        store.clone(),
        store,
        registry,
        config.pipeline.clone(),
    );

    // --- Durable storage ---
    let storage: Arc<dyn ObjectStorage> = match config.storage.clone() {
        Some(s3) => Arc::new(S3Storage::connect(s3).await),
        None => {
            tracing::warn!("S3_BUCKET not set; migrated assets are kept in memory only");
            Arc::new(MemoryStorage::new())
        }
    };
    let fetcher = Arc::new(HttpFetcher::new(DEFAULT_MAX_BYTES).context("Failed to build fetcher")?);

    // --- App state and workers ---
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    let state = AppState::new(config, services, storage, fetcher);
    let background = BackgroundTasks::spawn(&state);

    // --- Start server ---
    let app = build_app_router(state);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    background.shutdown(shutdown_timeout).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
