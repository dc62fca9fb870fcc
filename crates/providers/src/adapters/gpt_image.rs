//! Adapter for the GPT image endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use atelier_core::task_state::TaskState;
use serde::{Deserialize, Serialize};

use crate::adapter::{CreatedTask, ProviderAdapter, TaskRequest, TaskSnapshot};
use crate::client::{ApiEnvelope, ProviderHttpClient};
use crate::error::ProviderError;

const CREATE_PATH: &str = "/api/v1/gpt4o-image/generate";
const QUERY_PATH: &str = "/api/v1/gpt4o-image/record-info";

/// Upper bound on variants per request.
pub const MAX_VARIANTS: u32 = 4;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    prompt: &'a str,
    size: &'static str,
    call_back_url: &'a str,
    #[serde(skip_serializing_if = "is_empty_slice")]
    files_url: &'a [String],
    is_enhance: bool,
    upload_cn: bool,
    n_variants: u32,
    enable_fallback: bool,
}

fn is_empty_slice(urls: &&[String]) -> bool {
    urls.is_empty()
}

#[derive(Debug, Deserialize)]
struct CreateData {
    #[serde(rename = "taskId")]
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct RecordData {
    #[serde(rename = "taskId")]
    task_id: String,
    status: Option<String>,
    response: Option<RecordResponse>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    #[serde(default, rename = "resultUrls")]
    result_urls: Vec<String>,
}

/// Map an aspect ratio onto the three sizes the endpoint supports.
pub fn size_for_aspect(aspect: Option<&str>) -> &'static str {
    match aspect {
        Some("2:3" | "3:4" | "9:16" | "4:5") => "2:3",
        Some("3:2" | "4:3" | "16:9" | "5:4" | "21:9") => "3:2",
        _ => "1:1",
    }
}

/// Map the endpoint's upper-case status vocabulary onto [`TaskState`].
pub fn normalize_state(raw: &str) -> TaskState {
    match raw.to_ascii_uppercase().as_str() {
        "SUCCESS" => TaskState::Success,
        "FAIL" | "FAILED" | "CREATE_TASK_FAILED" | "GENERATE_FAILED" => TaskState::Fail,
        "GENERATING" | "PROCESSING" => TaskState::Generating,
        "QUEUING" => TaskState::Queued,
        _ => TaskState::Waiting,
    }
}

pub struct GptImageAdapter {
    client: Arc<ProviderHttpClient>,
}

impl GptImageAdapter {
    pub fn new(client: Arc<ProviderHttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for GptImageAdapter {
    fn name(&self) -> &'static str {
        "gpt-image"
    }

    async fn create_task(
        &self,
        request: &TaskRequest,
        callback_url: &str,
    ) -> Result<CreatedTask, ProviderError> {
        let body = GenerateBody {
            prompt: &request.prompt,
            size: size_for_aspect(request.aspect_ratio.as_deref()),
            call_back_url: callback_url,
            files_url: &request.reference_urls,
            is_enhance: false,
            upload_cn: false,
            n_variants: request.count.clamp(1, MAX_VARIANTS),
            enable_fallback: false,
        };
        let envelope: ApiEnvelope<CreateData> = self.client.post_json(CREATE_PATH, &body).await?;
        let data = envelope.into_data()?;

        tracing::info!(remote_task_id = %data.task_id, variants = body.n_variants, "GPT image task created");
        Ok(CreatedTask {
            remote_task_id: data.task_id,
        })
    }

    async fn query_task(
        &self,
        _model: &str,
        remote_task_id: &str,
    ) -> Result<TaskSnapshot, ProviderError> {
        let envelope: ApiEnvelope<RecordData> = self
            .client
            .get_json(QUERY_PATH, &[("taskId", remote_task_id)])
            .await?;
        let data = envelope.into_data()?;
        let state = normalize_state(data.status.as_deref().unwrap_or_default());

        Ok(TaskSnapshot {
            remote_task_id: data.task_id,
            state,
            result_urls: match (state, data.response) {
                (TaskState::Success, Some(response)) => response.result_urls,
                _ => Vec::new(),
            },
            fail_reason: data.error_message.filter(|m| !m.is_empty()),
        })
    }
}
