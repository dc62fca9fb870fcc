//! Uniform contract every provider adapter implements.

use async_trait::async_trait;
use atelier_core::task_state::TaskState;
use serde::Serialize;

use crate::error::ProviderError;

/// Provider-neutral parameters for one generation task.
///
/// Built by the job kind; each adapter translates it into its provider's
/// request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRequest {
    /// Canonical model id as resolved by the registry.
    pub model: String,
    pub prompt: String,
    pub count: u32,
    pub aspect_ratio: Option<String>,
    pub resolution: Option<String>,
    pub duration_secs: Option<u32>,
    pub reference_urls: Vec<String>,
}

/// Provider acknowledgement of a created task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTask {
    pub remote_task_id: String,
}

/// Normalized result of querying a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub remote_task_id: String,
    pub state: TaskState,
    pub result_urls: Vec<String>,
    pub fail_reason: Option<String>,
}

impl TaskSnapshot {
    pub fn pending(remote_task_id: impl Into<String>, state: TaskState) -> Self {
        Self {
            remote_task_id: remote_task_id.into(),
            state,
            result_urls: Vec::new(),
            fail_reason: None,
        }
    }
}

/// A provider-specific implementation of `create_task` / `query_task`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Submit a task. The provider will push its terminal state to
    /// `callback_url`.
    async fn create_task(
        &self,
        request: &TaskRequest,
        callback_url: &str,
    ) -> Result<CreatedTask, ProviderError>;

    /// Fetch the current state of a task created for `model`.
    async fn query_task(&self, model: &str, remote_task_id: &str)
        -> Result<TaskSnapshot, ProviderError>;
}
