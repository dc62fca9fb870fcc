//! Generation job orchestration.
//!
//! Provides:
//! - [`store`] -- `JobStore` / `CreditLedger` seams with Postgres and in-memory backends.
//! - [`kinds`] -- the per-job-type capability trait and its implementations.
//! - [`orchestrator`] -- job creation up to provider acceptance.
//! - [`queries`] -- status view with read-repair and job history.
//! - [`reconciler`] -- idempotent convergence of webhook and poll signals.
//! - [`polling`] -- background and on-demand provider polling.
//! - [`migration`] -- durable migration of ephemeral result URLs.

pub mod config;
pub mod error;
pub mod kinds;
pub mod migration;
pub mod orchestrator;
pub mod polling;
pub mod queries;
pub mod reconciler;
pub mod services;
pub mod store;

pub use config::{MigrationConfig, PipelineConfig, PollingConfig};
pub use error::{PipelineError, StoreError};
pub use migration::{MigrationError, MigrationScheduler, PendingMigrations, SweepReport};
pub use orchestrator::{CreatedJob, Orchestrator};
pub use polling::{PollOutcome, PollingWorker};
pub use queries::{JobQueries, JobStatusView, Viewer};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use services::Services;
