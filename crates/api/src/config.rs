use std::time::Duration;

use atelier_pipeline::PipelineConfig;
use atelier_providers::client::{ProviderConfig, DEFAULT_BASE_URL};
use atelier_storage::S3Config;

use crate::auth::jwt::JwtConfig;

/// Path the provider calls back on, relative to `PUBLIC_BASE_URL`.
pub const WEBHOOK_PATH: &str = "/api/v1/generation/webhook";

/// Server configuration loaded from environment variables.
///
/// All fields except the secrets have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Ceiling for draining background workers on shutdown.
    pub shutdown_timeout_secs: u64,
    pub jwt: JwtConfig,
    /// Bearer secret for internal callers. `None` disables internal access.
    pub internal_api_secret: Option<String>,
    pub public_base_url: String,
    pub provider: ProviderConfig,
    pub pipeline: PipelineConfig,
    /// Durable storage; `None` keeps migrated objects in memory.
    pub storage: Option<S3Config>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                   |
    /// |------------------------------|---------------------------|
    /// | `HOST`                       | `0.0.0.0`                 |
    /// | `PORT`                       | `3000`                    |
    /// | `CORS_ORIGINS`               | `http://localhost:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`       | `30`                      |
    /// | `SHUTDOWN_TIMEOUT_SECS`      | `30`                      |
    /// | `JWT_SECRET`                 | **required**              |
    /// | `INTERNAL_API_SECRET`        | unset (internal disabled) |
    /// | `PUBLIC_BASE_URL`            | `http://localhost:3000`   |
    /// | `PROVIDER_BASE_URL`          | `https://api.kie.ai`      |
    /// | `PROVIDER_API_KEY`           | **required**              |
    /// | `PROVIDER_TIMEOUT_SECS`      | `30`                      |
    /// | `POLL_INTERVAL_SECS`         | `15`                      |
    /// | `POLL_TIMEOUT_SECS`          | `300`                     |
    /// | `EPHEMERAL_URL_TTL_HOURS`    | `168`                     |
    /// | `TRANSFER_INTERVAL_SECS`     | `600`                     |
    /// | `TRANSFER_MAX_RETRIES`       | `3`                       |
    /// | `TRANSFER_JOB_CONCURRENCY`   | `3`                       |
    /// | `TRANSFER_ASSET_CONCURRENCY` | `3`                       |
    /// | `TRANSFER_ASSET_ATTEMPTS`    | `3`                       |
    /// | `TRANSFER_RETRY_DELAY_MS`    | `1000`                    |
    /// | `TRANSFER_CLAIM_LEASE_SECS`  | `1800`                    |
    /// | `S3_BUCKET`                  | unset (in-memory storage) |
    /// | `S3_REGION`                  | `us-east-1`               |
    /// | `S3_ENDPOINT`                | unset                     |
    /// | `S3_PUBLIC_BASE_URL`         | unset                     |
    ///
    /// # Panics
    ///
    /// Panics on missing required variables or unparsable values.
    pub fn from_env() -> Self {
        let host = env_or("HOST", "0.0.0.0");
        let port: u16 = env_parse("PORT", 3000);

        let cors_origins: Vec<String> = env_or("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_parse("REQUEST_TIMEOUT_SECS", 30);
        let shutdown_timeout_secs: u64 = env_parse("SHUTDOWN_TIMEOUT_SECS", 30);

        let public_base_url = env_or("PUBLIC_BASE_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();

        let api_key =
            std::env::var("PROVIDER_API_KEY").expect("PROVIDER_API_KEY must be set in the environment");
        let mut provider = ProviderConfig::new(env_or("PROVIDER_BASE_URL", DEFAULT_BASE_URL), api_key);
        provider.timeout = Duration::from_secs(env_parse("PROVIDER_TIMEOUT_SECS", 30));

        let mut pipeline = PipelineConfig {
            callback_url: format!("{public_base_url}{WEBHOOK_PATH}"),
            ephemeral_url_ttl: chrono::Duration::hours(env_parse("EPHEMERAL_URL_TTL_HOURS", 168)),
            ..Default::default()
        };
        pipeline.polling.interval = Duration::from_secs(env_parse("POLL_INTERVAL_SECS", 15));
        pipeline.polling.timeout = Duration::from_secs(env_parse("POLL_TIMEOUT_SECS", 300));
        let migration = &mut pipeline.migration;
        migration.interval = Duration::from_secs(env_parse("TRANSFER_INTERVAL_SECS", 600));
        migration.max_retries = env_parse("TRANSFER_MAX_RETRIES", migration.max_retries);
        migration.job_concurrency = env_parse("TRANSFER_JOB_CONCURRENCY", migration.job_concurrency);
        migration.asset_concurrency =
            env_parse("TRANSFER_ASSET_CONCURRENCY", migration.asset_concurrency);
        migration.asset_attempts = env_parse("TRANSFER_ASSET_ATTEMPTS", migration.asset_attempts);
        migration.retry_delay = Duration::from_millis(env_parse("TRANSFER_RETRY_DELAY_MS", 1000));
        migration.claim_lease = chrono::Duration::seconds(env_parse("TRANSFER_CLAIM_LEASE_SECS", 1800));

        let storage = env_opt("S3_BUCKET").map(|bucket| S3Config {
            bucket,
            region: env_or("S3_REGION", "us-east-1"),
            force_path_style: env_opt("S3_ENDPOINT").is_some(),
            endpoint: env_opt("S3_ENDPOINT"),
            public_base_url: env_opt("S3_PUBLIC_BASE_URL"),
        });

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env(),
            internal_api_secret: env_opt("INTERNAL_API_SECRET"),
            public_base_url,
            provider,
            pipeline,
            storage,
        }
    }
}
