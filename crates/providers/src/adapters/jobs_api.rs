//! Adapter for the provider's unified jobs API.
//!
//! `POST /api/v1/jobs/createTask` with `{ model, callBackUrl, input }` and
//! `GET /api/v1/jobs/recordInfo?taskId=`. One adapter serves every model
//! on this API; only the `input` object differs per model.

use std::sync::Arc;

use async_trait::async_trait;
use atelier_core::task_state::TaskState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::parse_result_json;
use crate::adapter::{CreatedTask, ProviderAdapter, TaskRequest, TaskSnapshot};
use crate::client::{ApiEnvelope, ProviderHttpClient};
use crate::error::ProviderError;

const CREATE_PATH: &str = "/api/v1/jobs/createTask";
const QUERY_PATH: &str = "/api/v1/jobs/recordInfo";

/// Image sizes the nano-banana models accept.
const NANO_BANANA_SIZES: &[&str] = &[
    "auto", "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "16:9", "9:16", "21:9",
];

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    model: &'a str,
    #[serde(rename = "callBackUrl")]
    callback_url: &'a str,
    input: Value,
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
    state: Option<String>,
    #[serde(rename = "resultJson")]
    result_json: Option<String>,
    #[serde(rename = "failMsg")]
    fail_msg: Option<String>,
}

/// Map the jobs API state vocabulary onto [`TaskState`].
pub fn normalize_state(raw: &str) -> TaskState {
    match raw {
        "success" => TaskState::Success,
        "fail" | "failed" => TaskState::Fail,
        "generating" | "processing" => TaskState::Generating,
        "queuing" => TaskState::Queued,
        _ => TaskState::Waiting,
    }
}

/// Translate a provider-neutral request into `(provider model, input)`.
pub fn build_input(request: &TaskRequest) -> Result<(String, Value), ProviderError> {
    let prompt = request.prompt.as_str();
    let refs = &request.reference_urls;
    let aspect = request.aspect_ratio.as_deref();

    let built = match request.model.as_str() {
        "google/nano-banana" | "google/nano-banana-edit" => {
            let image_size = aspect
                .filter(|a| NANO_BANANA_SIZES.contains(a))
                .unwrap_or("auto");
            let mut input = json!({
                "prompt": prompt,
                "output_format": "png",
                "image_size": image_size,
            });
            if request.model == "google/nano-banana-edit" {
                input["image_urls"] = json!(refs);
            }
            (request.model.clone(), input)
        }
        "nano-banana-pro" => (
            request.model.clone(),
            json!({
                "prompt": prompt,
                "image_input": refs,
                "aspect_ratio": aspect.unwrap_or("1:1"),
                "resolution": request.resolution.as_deref().unwrap_or("1K"),
                "output_format": "png",
            }),
        ),
        "bytedance/seedream-v4-text-to-image" | "seedream/4.5-text-to-image" => (
            request.model.clone(),
            json!({
                "prompt": prompt,
                "aspect_ratio": aspect.unwrap_or("1:1"),
                "quality": "basic",
            }),
        ),
        "z-image" => (
            request.model.clone(),
            json!({ "prompt": prompt, "aspect_ratio": aspect.unwrap_or("1:1") }),
        ),
        model if model.starts_with("flux-2/") => {
            let mut input = json!({
                "prompt": prompt,
                "aspect_ratio": aspect.unwrap_or("1:1"),
                "resolution": request.resolution.as_deref().unwrap_or("1K"),
            });
            if !refs.is_empty() {
                input["input_urls"] = json!(refs);
            }
            (request.model.clone(), input)
        }
        "kling/v2-5-turbo" => {
            let duration = if request.duration_secs.unwrap_or(5) <= 5 { "5" } else { "10" };
            let mut input = json!({
                "prompt": prompt,
                "duration": duration,
                "negative_prompt": "blur, distort, and low quality",
                "cfg_scale": 0.5,
            });
            let model = match refs.first() {
                Some(image) => {
                    input["image_url"] = json!(image);
                    "kling/v2-5-turbo-image-to-video-pro"
                }
                None => {
                    input["aspect_ratio"] = json!(aspect.unwrap_or("16:9"));
                    "kling/v2-5-turbo-text-to-video-pro"
                }
            };
            (model.to_string(), input)
        }
        "sora-2" => {
            let orientation = match aspect {
                Some("9:16") => "portrait",
                _ => "landscape",
            };
            let n_frames = if request.duration_secs.unwrap_or(10) <= 10 { "10" } else { "15" };
            let mut input = json!({
                "prompt": prompt,
                "aspect_ratio": orientation,
                "n_frames": n_frames,
                "remove_watermark": true,
            });
            let model = if refs.is_empty() {
                "sora-2-text-to-video"
            } else {
                input["image_urls"] = json!(refs);
                "sora-2-image-to-video"
            };
            (model.to_string(), input)
        }
        other => return Err(ProviderError::UnknownModel(other.to_string())),
    };
    Ok(built)
}

/// Adapter for every model served by the jobs API.
pub struct JobsApiAdapter {
    client: Arc<ProviderHttpClient>,
}

impl JobsApiAdapter {
    pub fn new(client: Arc<ProviderHttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for JobsApiAdapter {
    fn name(&self) -> &'static str {
        "jobs-api"
    }

    async fn create_task(
        &self,
        request: &TaskRequest,
        callback_url: &str,
    ) -> Result<CreatedTask, ProviderError> {
        let (model, input) = build_input(request)?;
        let body = CreateBody {
            model: &model,
            callback_url,
            input,
        };
        let envelope: ApiEnvelope<CreateData> = self.client.post_json(CREATE_PATH, &body).await?;
        let data = envelope.into_data()?;

        tracing::info!(model = %model, remote_task_id = %data.task_id, "Jobs API task created");
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
        let state = normalize_state(data.state.as_deref().unwrap_or_default());

        Ok(TaskSnapshot {
            remote_task_id: data.task_id,
            state,
            result_urls: if state == TaskState::Success {
                parse_result_json(data.result_json.as_deref())
            } else {
                Vec::new()
            },
            fail_reason: data.fail_msg.filter(|m| !m.is_empty()),
        })
    }
}
