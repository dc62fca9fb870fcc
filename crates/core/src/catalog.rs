//! Model catalog: pricing and timing for every dispatchable model.
//!
//! Keys are canonical provider model identifiers, i.e. the identifiers
//! the provider registry resolves requests to.

use crate::error::CoreError;
use crate::job::AssetKind;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Estimated provider time per image for GPT image models.
pub const GPT_IMAGE_SECS_PER_IMAGE: i32 = 15;

/// Estimated provider time per image for every other image model.
pub const IMAGE_SECS_PER_IMAGE: i32 = 10;

/// Estimated provider time for one video.
pub const VIDEO_ESTIMATE_SECS: i32 = 180;

/// Pricing rule for a model, in credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pricing {
    /// Same price per output.
    Flat(i32),
    /// Price per output depends on the requested resolution label.
    PerResolution(&'static [(&'static str, i32)]),
    /// Price per video by duration tier: `(max_secs, credits)` ascending.
    /// Durations beyond the last tier use the last tier's price.
    PerDuration(&'static [(u32, i32)]),
}

/// Catalog entry for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: &'static str,
    pub kind: AssetKind,
    pub pricing: Pricing,
}

pub const MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "google/nano-banana",
        kind: AssetKind::Image,
        pricing: Pricing::Flat(4),
    },
    ModelSpec {
        id: "google/nano-banana-edit",
        kind: AssetKind::Image,
        pricing: Pricing::Flat(4),
    },
    ModelSpec {
        id: "nano-banana-pro",
        kind: AssetKind::Image,
        pricing: Pricing::PerResolution(&[("1K", 18), ("2K", 18), ("4K", 24)]),
    },
    ModelSpec {
        id: "bytedance/seedream-v4-text-to-image",
        kind: AssetKind::Image,
        pricing: Pricing::Flat(4),
    },
    ModelSpec {
        id: "seedream/4.5-text-to-image",
        kind: AssetKind::Image,
        pricing: Pricing::Flat(6),
    },
    ModelSpec {
        id: "z-image",
        kind: AssetKind::Image,
        pricing: Pricing::Flat(2),
    },
    ModelSpec {
        id: "flux-2/pro-text-to-image",
        kind: AssetKind::Image,
        pricing: Pricing::PerResolution(&[("1K", 5), ("2K", 7)]),
    },
    ModelSpec {
        id: "flux-2/pro-image-to-image",
        kind: AssetKind::Image,
        pricing: Pricing::PerResolution(&[("1K", 5), ("2K", 7)]),
    },
    ModelSpec {
        id: "flux-2/flex-text-to-image",
        kind: AssetKind::Image,
        pricing: Pricing::PerResolution(&[("1K", 14), ("2K", 24)]),
    },
    ModelSpec {
        id: "flux-2/flex-image-to-image",
        kind: AssetKind::Image,
        pricing: Pricing::PerResolution(&[("1K", 14), ("2K", 24)]),
    },
    ModelSpec {
        id: "gpt4o-image",
        kind: AssetKind::Image,
        pricing: Pricing::Flat(6),
    },
    ModelSpec {
        id: "kling/v2-5-turbo",
        kind: AssetKind::Video,
        pricing: Pricing::PerDuration(&[(5, 210), (10, 420)]),
    },
    ModelSpec {
        id: "sora-2",
        kind: AssetKind::Video,
        pricing: Pricing::PerDuration(&[(10, 30), (15, 45)]),
    },
    ModelSpec {
        id: "veo3_fast",
        kind: AssetKind::Video,
        pricing: Pricing::Flat(300),
    },
];

/// Look up a model by its canonical identifier.
pub fn find_model(id: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|m| m.id == id)
}

/// Request attributes that influence pricing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostInput<'a> {
    pub count: u32,
    pub resolution: Option<&'a str>,
    pub duration_secs: Option<u32>,
}

/// Compute the catalog cost of a request.
///
/// Unknown models and missing or non-positive prices are validation
/// failures: a job is never created with an unpriced model.
pub fn compute_cost(model_id: &str, input: CostInput<'_>) -> Result<i32, CoreError> {
    let spec = find_model(model_id).ok_or_else(|| {
        CoreError::Validation(format!("No pricing configured for model '{model_id}'"))
    })?;

    let unit = match spec.pricing {
        Pricing::Flat(credits) => credits,
        Pricing::PerResolution(table) => {
            let resolution = input.resolution.ok_or_else(|| {
                CoreError::Validation(format!("Model '{model_id}' requires a resolution"))
            })?;
            table
                .iter()
                .find(|(label, _)| label.eq_ignore_ascii_case(resolution))
                .map(|(_, credits)| *credits)
                .ok_or_else(|| {
                    CoreError::Validation(format!(
                        "Resolution '{resolution}' is not available for model '{model_id}'"
                    ))
                })?
        }
        Pricing::PerDuration(tiers) => {
            let duration = input.duration_secs.ok_or_else(|| {
                CoreError::Validation(format!("Model '{model_id}' requires a duration"))
            })?;
            tiers
                .iter()
                .find(|(max, _)| duration <= *max)
                .or_else(|| tiers.last())
                .map(|(_, credits)| *credits)
                .ok_or_else(|| {
                    CoreError::Validation(format!("No duration tiers configured for '{model_id}'"))
                })?
        }
    };

    if unit <= 0 {
        return Err(CoreError::Validation(format!(
            "Invalid price configured for model '{model_id}'"
        )));
    }

    let count = i32::try_from(input.count.max(1))
        .map_err(|_| CoreError::Validation("Output count out of range".to_string()))?;
    Ok(unit * count)
}

/// Rough wall-clock estimate returned to the caller at creation time.
pub fn estimated_seconds(model_id: &str, kind: AssetKind, count: u32) -> i32 {
    let count = count.max(1) as i32;
    match kind {
        AssetKind::Video => VIDEO_ESTIMATE_SECS * count,
        AssetKind::Image if model_id.contains("gpt") => GPT_IMAGE_SECS_PER_IMAGE * count,
        AssetKind::Image => IMAGE_SECS_PER_IMAGE * count,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn images(count: u32) -> CostInput<'static> {
        CostInput {
            count,
            ..Default::default()
        }
    }

    #[test]
    fn flat_price_multiplies_by_count() {
        assert_eq!(compute_cost("google/nano-banana", images(3)).unwrap(), 12);
    }

    #[test]
    fn per_resolution_price_uses_requested_tier() {
        let input = CostInput {
            count: 2,
            resolution: Some("4k"),
            duration_secs: None,
        };
        assert_eq!(compute_cost("nano-banana-pro", input).unwrap(), 48);
    }

    #[test]
    fn per_resolution_requires_resolution() {
        assert_matches!(
            compute_cost("nano-banana-pro", images(1)),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn unknown_resolution_is_rejected() {
        let input = CostInput {
            count: 1,
            resolution: Some("8K"),
            duration_secs: None,
        };
        assert_matches!(
            compute_cost("flux-2/pro-text-to-image", input),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn duration_tiers_pick_first_matching_tier() {
        let five = CostInput {
            count: 1,
            resolution: None,
            duration_secs: Some(5),
        };
        let ten = CostInput {
            duration_secs: Some(10),
            ..five
        };
        assert_eq!(compute_cost("kling/v2-5-turbo", five).unwrap(), 210);
        assert_eq!(compute_cost("kling/v2-5-turbo", ten).unwrap(), 420);
    }

    #[test]
    fn unknown_model_is_validation_error() {
        assert_matches!(
            compute_cost("midjourney", images(1)),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn every_catalog_price_is_positive() {
        for spec in MODELS {
            match spec.pricing {
                Pricing::Flat(c) => assert!(c > 0, "{}", spec.id),
                Pricing::PerResolution(t) => assert!(t.iter().all(|(_, c)| *c > 0), "{}", spec.id),
                Pricing::PerDuration(t) => {
                    assert!(!t.is_empty() && t.iter().all(|(_, c)| *c > 0), "{}", spec.id)
                }
            }
        }
    }

    #[test]
    fn estimates_depend_on_model_family() {
        assert_eq!(estimated_seconds("gpt4o-image", AssetKind::Image, 2), 30);
        assert_eq!(estimated_seconds("google/nano-banana", AssetKind::Image, 2), 20);
        assert_eq!(estimated_seconds("veo3_fast", AssetKind::Video, 1), 180);
    }
}
