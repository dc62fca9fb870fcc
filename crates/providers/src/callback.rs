//! Parsing of provider webhook payloads.
//!
//! Three envelope shapes arrive at the callback URL:
//!
//! - jobs API: `data.state`, `data.resultJson` (a JSON string holding
//!   `resultUrls`), `data.failMsg`;
//! - GPT image: `code == 200` plus `data.info.result_urls`, anything else
//!   is a failure described by `msg`;
//! - Veo: `code == 200` plus `data.info.resultUrls`.

use atelier_core::task_state::TaskState;
use serde_json::Value;

use crate::adapters::jobs_api;
use crate::error::ProviderError;

/// A provider callback reduced to the reconciler's inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    pub remote_task_id: String,
    pub state: TaskState,
    pub result_urls: Vec<String>,
    pub fail_reason: Option<String>,
}

/// Parse a raw callback body.
///
/// A missing task id is an error; every other irregularity resolves to
/// the most conservative reading of the payload.
pub fn parse_callback(body: &Value) -> Result<CallbackPayload, ProviderError> {
    let data = body.get("data").unwrap_or(&Value::Null);
    let remote_task_id = string_at(data, &["taskId", "task_id"])
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::Malformed("callback has no taskId".to_string()))?;

    let code = body.get("code").and_then(Value::as_i64);
    let msg = string_at(body, &["msg", "message"]);

    // Jobs API shape.
    if let Some(state) = data.get("state").and_then(Value::as_str) {
        let state = jobs_api::normalize_state(state);
        let result_urls = if state == TaskState::Success {
            crate::adapters::parse_result_json(data.get("resultJson").and_then(Value::as_str))
        } else {
            Vec::new()
        };
        return Ok(CallbackPayload {
            remote_task_id,
            state,
            result_urls,
            fail_reason: string_at(data, &["failMsg"]).or(msg).filter(|m| !m.is_empty()),
        });
    }

    // GPT image / Veo shape: the envelope code carries the outcome.
    if code == Some(200) {
        let info = data.get("info").unwrap_or(&Value::Null);
        let result_urls = ["result_urls", "resultUrls"]
            .iter()
            .find_map(|key| info.get(*key).and_then(Value::as_array))
            .map(|urls| {
                urls.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        return Ok(CallbackPayload {
            remote_task_id,
            state: TaskState::Success,
            result_urls,
            fail_reason: None,
        });
    }

    Ok(CallbackPayload {
        remote_task_id,
        state: TaskState::Fail,
        result_urls: Vec::new(),
        fail_reason: msg
            .or_else(|| string_at(data, &["errorMessage", "failMsg"]))
            .filter(|m| !m.is_empty()),
    })
}

fn string_at(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
