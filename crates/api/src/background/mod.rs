//! Background workers.
//!
//! The polling worker and the migration scheduler run as long-lived tasks
//! spawned via `tokio::spawn`. Both accept a [`CancellationToken`] for
//! graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Handles to the running workers.
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    /// Spawn the polling worker and the migration scheduler.
    pub fn spawn(state: &AppState) -> Self {
        let cancel = CancellationToken::new();

        let poller = Arc::clone(&state.poller);
        let poller_cancel = cancel.clone();
        let poller_handle = tokio::spawn(async move {
            poller.run(poller_cancel).await;
        });

        let migration = Arc::clone(&state.migration);
        let migration_cancel = cancel.clone();
        let migration_handle = tokio::spawn(async move {
            migration.run(migration_cancel).await;
        });

        tracing::info!("Background workers started (polling, migration)");
        Self {
            cancel,
            handles: vec![("polling", poller_handle), ("migration", migration_handle)],
        }
    }

    /// Cancel every worker and wait up to `timeout` for each to finish.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();
        for (name, handle) in self.handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => tracing::info!(worker = name, "Background worker stopped"),
                Ok(Err(e)) => tracing::error!(worker = name, error = %e, "Background worker panicked"),
                Err(_) => tracing::warn!(worker = name, "Background worker did not stop in time"),
            }
        }
    }
}
