//! Adapter for the Veo video endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use atelier_core::task_state::TaskState;
use serde::{Deserialize, Serialize};

use crate::adapter::{CreatedTask, ProviderAdapter, TaskRequest, TaskSnapshot};
use crate::client::{ApiEnvelope, ProviderHttpClient};
use crate::error::ProviderError;

const CREATE_PATH: &str = "/api/v1/veo/generate";
const QUERY_PATH: &str = "/api/v1/veo/record-info";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    prompt: &'a str,
    model: &'a str,
    aspect_ratio: &'static str,
    call_back_url: &'a str,
    generation_type: &'static str,
    #[serde(skip_serializing_if = "is_empty_slice")]
    image_urls: &'a [String],
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
    #[serde(rename = "successFlag")]
    success_flag: Option<i64>,
    response: Option<RecordResponse>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    #[serde(default, rename = "resultUrls")]
    result_urls: Vec<String>,
}

pub fn aspect_for(aspect: Option<&str>) -> &'static str {
    match aspect {
        Some("9:16") => "9:16",
        Some("1:1") => "Auto",
        _ => "16:9",
    }
}

/// `successFlag`: 0 generating, 1 success, 2 and 3 failed.
pub fn normalize_flag(flag: Option<i64>) -> TaskState {
    match flag {
        Some(1) => TaskState::Success,
        Some(2 | 3) => TaskState::Fail,
        Some(0) => TaskState::Generating,
        _ => TaskState::Waiting,
    }
}

pub struct VeoAdapter {
    client: Arc<ProviderHttpClient>,
}

impl VeoAdapter {
    pub fn new(client: Arc<ProviderHttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for VeoAdapter {
    fn name(&self) -> &'static str {
        "veo"
    }

    async fn create_task(
        &self,
        request: &TaskRequest,
        callback_url: &str,
    ) -> Result<CreatedTask, ProviderError> {
        let generation_type = if request.reference_urls.is_empty() {
            "TEXT_2_VIDEO"
        } else {
            "FIRST_AND_LAST_FRAMES_2_VIDEO"
        };
        let body = GenerateBody {
            prompt: &request.prompt,
            model: &request.model,
            aspect_ratio: aspect_for(request.aspect_ratio.as_deref()),
            call_back_url: callback_url,
            generation_type,
            image_urls: &request.reference_urls,
        };
        let envelope: ApiEnvelope<CreateData> = self.client.post_json(CREATE_PATH, &body).await?;
        let data = envelope.into_data()?;

        tracing::info!(remote_task_id = %data.task_id, generation_type, "Veo task created");
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
        let state = normalize_flag(data.success_flag);

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
