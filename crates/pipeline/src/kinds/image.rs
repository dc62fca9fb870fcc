//! Text/reference-to-image generation.

use atelier_core::catalog::CostInput;
use atelier_core::error::CoreError;
use atelier_core::job::AssetKind;
use atelier_core::metadata::{CostSource, ImageAuditV1, JobMetadata, JobType};
use atelier_core::validation::{
    validate_one_of, validate_prompt, validate_range, validate_reference_urls,
    IMAGE_ASPECT_RATIOS,
};
use atelier_providers::TaskRequest;
use serde::Deserialize;

use super::{non_blank, JobKind};

pub const MAX_IMAGES: u32 = 4;
pub const MAX_REFERENCE_IMAGES: usize = 8;
pub const RESOLUTIONS: &[&str] = &["1K", "2K", "4K"];
pub const MAX_STYLE_PRESET_LENGTH: usize = 64;

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageRequest {
    pub model_id: String,
    pub prompt: String,
    #[serde(default = "default_count")]
    pub count: u32,
    pub aspect_ratio: Option<String>,
    pub resolution: Option<String>,
    #[serde(default)]
    pub reference_urls: Vec<String>,
    pub style_preset: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageKind;

impl ImageKind {
    /// Prompt sent to the provider: the user prompt plus the style preset.
    pub fn provider_prompt(request: &ImageRequest) -> String {
        let prompt = request.prompt.trim();
        match non_blank(&request.style_preset) {
            Some(style) => format!("{prompt}\n\nStyle: {style}"),
            None => prompt.to_string(),
        }
    }
}

impl JobKind for ImageKind {
    type Request = ImageRequest;

    const JOB_TYPE: JobType = JobType::Image;
    const ASSET_KIND: AssetKind = AssetKind::Image;

    fn validate(&self, request: &ImageRequest) -> Result<(), CoreError> {
        validate_prompt(&request.prompt)?;
        validate_range("count", request.count, 1, MAX_IMAGES)?;
        validate_one_of("aspect_ratio", request.aspect_ratio.as_deref(), IMAGE_ASPECT_RATIOS)?;
        validate_one_of("resolution", request.resolution.as_deref(), RESOLUTIONS)?;
        validate_reference_urls(&request.reference_urls, MAX_REFERENCE_IMAGES)?;
        if let Some(style) = non_blank(&request.style_preset) {
            if style.chars().count() > MAX_STYLE_PRESET_LENGTH {
                return Err(CoreError::Validation(format!(
                    "style_preset exceeds {MAX_STYLE_PRESET_LENGTH} characters"
                )));
            }
        }
        Ok(())
    }

    fn model_id<'r>(&self, request: &'r ImageRequest) -> &'r str {
        &request.model_id
    }

    fn reference_urls<'r>(&self, request: &'r ImageRequest) -> &'r [String] {
        &request.reference_urls
    }

    fn output_count(&self, request: &ImageRequest) -> u32 {
        request.count
    }

    fn cost_input<'r>(&self, request: &'r ImageRequest) -> CostInput<'r> {
        CostInput {
            count: request.count,
            resolution: request.resolution.as_deref(),
            duration_secs: None,
        }
    }

    fn build_provider_params(&self, request: &ImageRequest, model_id: &str) -> TaskRequest {
        TaskRequest {
            model: model_id.to_string(),
            prompt: Self::provider_prompt(request),
            count: request.count,
            aspect_ratio: request.aspect_ratio.clone(),
            resolution: request.resolution.clone(),
            duration_secs: None,
            reference_urls: request.reference_urls.clone(),
        }
    }

    fn extract_audit_fields(
        &self,
        request: &ImageRequest,
        model_id: &str,
        cost_source: CostSource,
    ) -> JobMetadata {
        JobMetadata::ImageV1(ImageAuditV1 {
            original_prompt: request.prompt.clone(),
            provider_prompt: Self::provider_prompt(request),
            requested_model: request.model_id.clone(),
            resolved_model: model_id.to_string(),
            count: request.count,
            aspect_ratio: request.aspect_ratio.clone(),
            resolution: request.resolution.clone(),
            reference_urls: request.reference_urls.clone(),
            style_preset: non_blank(&request.style_preset).map(str::to_string),
            cost_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use atelier_core::authority::InternalAuthority;

    use super::*;
    use crate::kinds::CostOverride;

    fn request() -> ImageRequest {
        ImageRequest {
            model_id: "google/nano-banana".to_string(),
            prompt: "a lighthouse in fog".to_string(),
            count: 2,
            aspect_ratio: Some("16:9".to_string()),
            resolution: None,
            reference_urls: vec![],
            style_preset: Some("watercolor".to_string()),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(ImageKind.validate(&request()).is_ok());
    }

    #[test]
    fn rejects_bad_count_aspect_and_urls() {
        let mut r = request();
        r.count = 5;
        assert_matches!(ImageKind.validate(&r), Err(CoreError::Validation(_)));

        let mut r = request();
        r.aspect_ratio = Some("7:3".to_string());
        assert_matches!(ImageKind.validate(&r), Err(CoreError::Validation(_)));

        let mut r = request();
        r.reference_urls = vec!["ftp://example.com/a.png".to_string()];
        assert_matches!(ImageKind.validate(&r), Err(CoreError::Validation(_)));
    }

    #[test]
    fn catalog_cost_scales_with_count() {
        let cost = ImageKind.resolve_cost(&request(), "google/nano-banana", None).unwrap();
        assert_eq!(cost.credits, 8);
        assert_eq!(cost.source, CostSource::Catalog);
    }

    #[test]
    fn per_resolution_model_requires_resolution() {
        let r = request();
        assert_matches!(
            ImageKind.resolve_cost(&r, "nano-banana-pro", None),
            Err(CoreError::Validation(_))
        );
        let mut r = request();
        r.resolution = Some("4K".to_string());
        assert_eq!(ImageKind.resolve_cost(&r, "nano-banana-pro", None).unwrap().credits, 48);
    }

    #[test]
    fn authorized_override_wins_including_zero() {
        let o = CostOverride {
            credits: 0,
            authority: InternalAuthority::system(),
        };
        let cost = ImageKind.resolve_cost(&request(), "google/nano-banana", Some(o)).unwrap();
        assert_eq!(cost.credits, 0);
        assert_eq!(cost.source, CostSource::InternalOverride);
    }

    #[test]
    fn style_preset_reaches_provider_prompt_and_audit() {
        let params = ImageKind.build_provider_params(&request(), "google/nano-banana");
        assert!(params.prompt.ends_with("Style: watercolor"));
        let JobMetadata::ImageV1(audit) =
            ImageKind.extract_audit_fields(&request(), "google/nano-banana", CostSource::Catalog)
        else {
            panic!("expected image metadata");
        };
        assert_eq!(audit.original_prompt, "a lighthouse in fog");
        assert_eq!(audit.style_preset.as_deref(), Some("watercolor"));
    }
}
