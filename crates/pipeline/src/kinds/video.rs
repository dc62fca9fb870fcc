//! Text/image-to-video generation.

use atelier_core::catalog::CostInput;
use atelier_core::error::CoreError;
use atelier_core::job::AssetKind;
use atelier_core::metadata::{CostSource, JobMetadata, JobType, VideoAuditV1};
use atelier_core::validation::{
    validate_one_of, validate_prompt, validate_reference_urls, VIDEO_ASPECT_RATIOS,
};
use atelier_providers::TaskRequest;
use serde::Deserialize;

use super::JobKind;

pub const DURATIONS_SECS: &[u32] = &[5, 10];
pub const MAX_REFERENCE_IMAGES: usize = 3;

fn default_duration() -> u32 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VideoRequest {
    pub model_id: String,
    pub prompt: String,
    #[serde(default = "default_duration")]
    pub duration_secs: u32,
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub reference_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VideoKind;

impl JobKind for VideoKind {
    type Request = VideoRequest;

    const JOB_TYPE: JobType = JobType::Video;
    const ASSET_KIND: AssetKind = AssetKind::Video;

    fn validate(&self, request: &VideoRequest) -> Result<(), CoreError> {
        validate_prompt(&request.prompt)?;
        if !DURATIONS_SECS.contains(&request.duration_secs) {
            return Err(CoreError::Validation(format!(
                "duration_secs must be one of {DURATIONS_SECS:?} (got {})",
                request.duration_secs
            )));
        }
        validate_one_of("aspect_ratio", request.aspect_ratio.as_deref(), VIDEO_ASPECT_RATIOS)?;
        validate_reference_urls(&request.reference_urls, MAX_REFERENCE_IMAGES)
    }

    fn model_id<'r>(&self, request: &'r VideoRequest) -> &'r str {
        &request.model_id
    }

    fn reference_urls<'r>(&self, request: &'r VideoRequest) -> &'r [String] {
        &request.reference_urls
    }

    fn cost_input<'r>(&self, request: &'r VideoRequest) -> CostInput<'r> {
        CostInput {
            count: 1,
            resolution: None,
            duration_secs: Some(request.duration_secs),
        }
    }

    fn build_provider_params(&self, request: &VideoRequest, model_id: &str) -> TaskRequest {
        TaskRequest {
            model: model_id.to_string(),
            prompt: request.prompt.trim().to_string(),
            count: 1,
            aspect_ratio: request.aspect_ratio.clone(),
            resolution: None,
            duration_secs: Some(request.duration_secs),
            reference_urls: request.reference_urls.clone(),
        }
    }

    fn extract_audit_fields(
        &self,
        request: &VideoRequest,
        model_id: &str,
        cost_source: CostSource,
    ) -> JobMetadata {
        JobMetadata::VideoV1(VideoAuditV1 {
            original_prompt: request.prompt.clone(),
            requested_model: request.model_id.clone(),
            resolved_model: model_id.to_string(),
            duration_secs: request.duration_secs,
            aspect_ratio: request.aspect_ratio.clone(),
            reference_urls: request.reference_urls.clone(),
            cost_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn request(duration: u32) -> VideoRequest {
        VideoRequest {
            model_id: "kling/v2-5-turbo".to_string(),
            prompt: "waves breaking on basalt".to_string(),
            duration_secs: duration,
            aspect_ratio: Some("9:16".to_string()),
            reference_urls: vec![],
        }
    }

    #[test]
    fn only_supported_durations_pass() {
        assert!(VideoKind.validate(&request(5)).is_ok());
        assert!(VideoKind.validate(&request(10)).is_ok());
        assert_matches!(VideoKind.validate(&request(7)), Err(CoreError::Validation(_)));
    }

    #[test]
    fn duration_tier_prices_the_job() {
        let short = VideoKind.resolve_cost(&request(5), "kling/v2-5-turbo", None).unwrap();
        let long = VideoKind.resolve_cost(&request(10), "kling/v2-5-turbo", None).unwrap();
        assert_eq!((short.credits, long.credits), (210, 420));
    }

    #[test]
    fn video_estimate_is_fixed() {
        assert_eq!(VideoKind.estimated_seconds(&request(5), "veo3_fast"), 180);
    }
}
