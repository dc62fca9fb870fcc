//! Pipeline tuning.
//!
//! Plain structs with `Default` so tests and the API server can build them
//! directly; the server fills them from its environment.

use std::time::Duration;

use atelier_core::transfer::{
    DEFAULT_CLAIM_LEASE_MINUTES, DEFAULT_KEY_PREFIX, DEFAULT_MAX_TRANSFER_RETRIES,
};

/// Progress recorded when the provider accepts a task.
pub const ACCEPTED_PROGRESS: i16 = 10;

/// Progress recorded once the provider reports it is generating.
pub const GENERATING_PROGRESS: i16 = 50;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Public webhook endpoint the per-job token is appended to.
    pub callback_url: String,
    /// How long provider-hosted result URLs stay downloadable.
    pub ephemeral_url_ttl: chrono::Duration,
    pub polling: PollingConfig,
    pub migration: MigrationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            callback_url: "http://localhost:3000/api/v1/generation/webhook".to_string(),
            ephemeral_url_ttl: chrono::Duration::hours(168),
            polling: PollingConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub interval: Duration,
    /// Ceiling measured from provider acceptance. Jobs still `Pending`
    /// this long after creation are failed too.
    pub timeout: Duration,
    pub concurrency: usize,
    /// Consecutive query errors before a job is declared failed.
    pub max_consecutive_errors: u32,
    /// Maximum jobs examined per tick.
    pub batch_limit: i64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(300),
            concurrency: 4,
            max_consecutive_errors: 3,
            batch_limit: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub interval: Duration,
    pub max_retries: i32,
    pub job_concurrency: usize,
    pub asset_concurrency: usize,
    /// Attempts per asset within one sweep.
    pub asset_attempts: u32,
    /// Base of the linear backoff between asset attempts.
    pub retry_delay: Duration,
    /// A `Transferring` claim older than this is treated as abandoned.
    pub claim_lease: chrono::Duration,
    pub key_prefix: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            max_retries: DEFAULT_MAX_TRANSFER_RETRIES,
            job_concurrency: 3,
            asset_concurrency: 3,
            asset_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            claim_lease: chrono::Duration::minutes(DEFAULT_CLAIM_LEASE_MINUTES),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}
