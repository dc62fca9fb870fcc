//! Internal character-portrait generation.
//!
//! Avatar jobs are initiated by the system on behalf of a character, never
//! billed, and can only be built by a holder of an [`InternalAuthority`].

use atelier_core::authority::InternalAuthority;
use atelier_core::catalog::CostInput;
use atelier_core::error::CoreError;
use atelier_core::job::AssetKind;
use atelier_core::metadata::{AvatarAuditV1, CostSource, JobMetadata, JobType};
use atelier_core::validation::{validate_prompt, validate_reference_urls};
use atelier_providers::TaskRequest;

use super::{CostOverride, JobKind, ResolvedCost};

pub const MAX_REFERENCE_IMAGES: usize = 4;
pub const AVATAR_ASPECT_RATIO: &str = "3:4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarRequest {
    pub authority: InternalAuthority,
    /// Opaque reference to the character the portrait is for.
    pub subject_ref: String,
    pub prompt: String,
    pub model_id: String,
    pub reference_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AvatarKind;

impl JobKind for AvatarKind {
    type Request = AvatarRequest;

    const JOB_TYPE: JobType = JobType::Avatar;
    const ASSET_KIND: AssetKind = AssetKind::Image;

    fn validate(&self, request: &AvatarRequest) -> Result<(), CoreError> {
        if request.subject_ref.trim().is_empty() {
            return Err(CoreError::Validation("subject_ref must not be empty".to_string()));
        }
        validate_prompt(&request.prompt)?;
        validate_reference_urls(&request.reference_urls, MAX_REFERENCE_IMAGES)
    }

    fn model_id<'r>(&self, request: &'r AvatarRequest) -> &'r str {
        &request.model_id
    }

    fn reference_urls<'r>(&self, request: &'r AvatarRequest) -> &'r [String] {
        &request.reference_urls
    }

    fn cost_input<'r>(&self, _request: &'r AvatarRequest) -> CostInput<'r> {
        CostInput {
            count: 1,
            ..Default::default()
        }
    }

    /// Always free; the request's authority stands in for the override.
    fn resolve_cost(
        &self,
        _request: &AvatarRequest,
        _model_id: &str,
        _cost_override: Option<CostOverride>,
    ) -> Result<ResolvedCost, CoreError> {
        Ok(ResolvedCost {
            credits: 0,
            source: CostSource::InternalOverride,
        })
    }

    fn build_provider_params(&self, request: &AvatarRequest, model_id: &str) -> TaskRequest {
        TaskRequest {
            model: model_id.to_string(),
            prompt: request.prompt.trim().to_string(),
            count: 1,
            aspect_ratio: Some(AVATAR_ASPECT_RATIO.to_string()),
            resolution: Some("1K".to_string()),
            duration_secs: None,
            reference_urls: request.reference_urls.clone(),
        }
    }

    fn extract_audit_fields(
        &self,
        request: &AvatarRequest,
        model_id: &str,
        _cost_source: CostSource,
    ) -> JobMetadata {
        JobMetadata::AvatarV1(AvatarAuditV1 {
            subject_ref: request.subject_ref.clone(),
            prompt: request.prompt.clone(),
            requested_model: request.model_id.clone(),
            resolved_model: model_id.to_string(),
            reference_urls: request.reference_urls.clone(),
        })
    }
}
