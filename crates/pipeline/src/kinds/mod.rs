//! Per-job-type capability trait.
//!
//! The orchestrator is generic over [`JobKind`]; each job type supplies
//! its own validation, pricing input, provider parameters and audit
//! record.

use atelier_core::authority::InternalAuthority;
use atelier_core::catalog::{self, CostInput};
use atelier_core::error::CoreError;
use atelier_core::job::AssetKind;
use atelier_core::metadata::{CostSource, JobMetadata, JobType};
use atelier_providers::TaskRequest;

pub mod avatar;
pub mod image;
pub mod video;

pub use avatar::{AvatarKind, AvatarRequest};
pub use image::{ImageKind, ImageRequest};
pub use video::{VideoKind, VideoRequest};

/// An explicit cost, honoured only alongside an [`InternalAuthority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostOverride {
    pub credits: i32,
    pub authority: InternalAuthority,
}

/// The credits a job will be charged and where the figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCost {
    pub credits: i32,
    pub source: CostSource,
}

pub trait JobKind: Send + Sync + 'static {
    type Request: Send + Sync;

    const JOB_TYPE: JobType;
    const ASSET_KIND: AssetKind;

    /// Check required fields, ranges and reference-input URLs.
    fn validate(&self, request: &Self::Request) -> Result<(), CoreError>;

    /// Model the caller asked for, before registry resolution.
    fn model_id<'r>(&self, request: &'r Self::Request) -> &'r str;

    fn reference_urls<'r>(&self, request: &'r Self::Request) -> &'r [String];

    /// Number of outputs requested.
    fn output_count(&self, _request: &Self::Request) -> u32 {
        1
    }

    /// Attributes the catalog prices on.
    fn cost_input<'r>(&self, request: &'r Self::Request) -> CostInput<'r>;

    /// Resolve the credit cost: an authorized override wins (zero
    /// included), otherwise the catalog prices `cost_input`.
    fn resolve_cost(
        &self,
        request: &Self::Request,
        model_id: &str,
        cost_override: Option<CostOverride>,
    ) -> Result<ResolvedCost, CoreError> {
        if let Some(o) = cost_override {
            if o.credits < 0 {
                return Err(CoreError::Validation(
                    "Credit override must not be negative".to_string(),
                ));
            }
            return Ok(ResolvedCost {
                credits: o.credits,
                source: CostSource::InternalOverride,
            });
        }
        Ok(ResolvedCost {
            credits: catalog::compute_cost(model_id, self.cost_input(request))?,
            source: CostSource::Catalog,
        })
    }

    /// Provider-neutral task parameters for the resolved model.
    fn build_provider_params(&self, request: &Self::Request, model_id: &str) -> TaskRequest;

    /// Typed audit record persisted with the job.
    fn extract_audit_fields(
        &self,
        request: &Self::Request,
        model_id: &str,
        cost_source: CostSource,
    ) -> JobMetadata;

    fn estimated_seconds(&self, request: &Self::Request, model_id: &str) -> i32 {
        catalog::estimated_seconds(model_id, Self::ASSET_KIND, self.output_count(request))
    }
}

/// Trim optional free text, treating blank as absent.
pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
