//! Model resolution and adapter selection.
//!
//! A [`ModelRoute`] describes one canonical model: the names it answers
//! to, its reference-input capabilities and the adapter serving it.
//! Resolution is deterministic and depends only on the requested model id
//! and whether reference inputs are present.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::ProviderAdapter;
use crate::adapters::{GptImageAdapter, JobsApiAdapter, VeoAdapter};
use crate::client::ProviderHttpClient;
use crate::error::ProviderError;

/// Static description of one canonical model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRoute {
    pub model_id: &'static str,
    /// Alternative names accepted from callers.
    pub aliases: &'static [&'static str],
    /// Maximum reference inputs; 0 means none are accepted.
    pub max_reference_inputs: usize,
    pub requires_reference_inputs: bool,
    /// Variant to use instead when reference inputs are present.
    pub with_references: Option<&'static str>,
    /// Maximum outputs one task can produce.
    pub max_outputs: u32,
}

/// The outcome of resolving a model request.
#[derive(Clone)]
pub struct ResolvedModel {
    pub model_id: &'static str,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("model_id", &self.model_id)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Standard routes
// ---------------------------------------------------------------------------

const fn route(
    model_id: &'static str,
    aliases: &'static [&'static str],
    max_reference_inputs: usize,
    max_outputs: u32,
) -> ModelRoute {
    ModelRoute {
        model_id,
        aliases,
        max_reference_inputs,
        requires_reference_inputs: false,
        with_references: None,
        max_outputs,
    }
}

/// Models served by the jobs API.
pub const JOBS_API_ROUTES: &[ModelRoute] = &[
    ModelRoute {
        with_references: Some("google/nano-banana-edit"),
        ..route("google/nano-banana", &["nano-banana"], 0, 1)
    },
    ModelRoute {
        requires_reference_inputs: true,
        ..route("google/nano-banana-edit", &["nano-banana-edit"], 8, 1)
    },
    route("nano-banana-pro", &["google/nano-banana-pro"], 8, 1),
    route(
        "bytedance/seedream-v4-text-to-image",
        &["seedream", "seedream-v4"],
        0,
        1,
    ),
    route("seedream/4.5-text-to-image", &["seedream-4.5"], 0, 1),
    route("z-image", &[], 0, 1),
    ModelRoute {
        with_references: Some("flux-2/pro-image-to-image"),
        ..route("flux-2/pro-text-to-image", &["flux-2-pro"], 0, 1)
    },
    ModelRoute {
        requires_reference_inputs: true,
        ..route("flux-2/pro-image-to-image", &[], 8, 1)
    },
    ModelRoute {
        with_references: Some("flux-2/flex-image-to-image"),
        ..route("flux-2/flex-text-to-image", &["flux-2-flex"], 0, 1)
    },
    ModelRoute {
        requires_reference_inputs: true,
        ..route("flux-2/flex-image-to-image", &[], 8, 1)
    },
    route("kling/v2-5-turbo", &["kling"], 1, 1),
    route("sora-2", &["sora"], 3, 1),
];

pub const GPT_IMAGE_ROUTES: &[ModelRoute] =
    &[route("gpt4o-image", &["gpt-image", "gpt-4o-image"], 5, 4)];

pub const VEO_ROUTES: &[ModelRoute] = &[route("veo3_fast", &["veo", "veo3"], 1, 1)];

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Explicit registry of model routes and the adapters serving them.
///
/// Built once at startup and shared by reference.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    routes: HashMap<&'static str, (ModelRoute, Arc<dyn ProviderAdapter>)>,
    aliases: HashMap<&'static str, &'static str>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry wired to the real provider adapters.
    pub fn standard(client: Arc<ProviderHttpClient>) -> Self {
        let mut registry = Self::new();
        registry.register_all(JOBS_API_ROUTES, Arc::new(JobsApiAdapter::new(client.clone())));
        registry.register_all(GPT_IMAGE_ROUTES, Arc::new(GptImageAdapter::new(client.clone())));
        registry.register_all(VEO_ROUTES, Arc::new(VeoAdapter::new(client)));
        registry
    }

    pub fn register(&mut self, route: ModelRoute, adapter: Arc<dyn ProviderAdapter>) {
        for alias in route.aliases {
            self.aliases.insert(*alias, route.model_id);
        }
        self.routes.insert(route.model_id, (route, adapter));
    }

    pub fn register_all(&mut self, routes: &[ModelRoute], adapter: Arc<dyn ProviderAdapter>) {
        for route in routes {
            self.register(*route, adapter.clone());
        }
    }

    /// Look up a route by canonical id or alias.
    pub fn route(&self, model_id: &str) -> Option<&ModelRoute> {
        self.lookup(model_id).map(|(route, _)| route)
    }

    /// Adapter serving an already-resolved model, used when querying tasks.
    pub fn adapter_for(&self, model_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.lookup(model_id).map(|(_, adapter)| adapter.clone())
    }

    /// Resolve a requested model for a request with `reference_count`
    /// reference inputs and `count` outputs.
    ///
    /// Exact match, then alias, then the reference-input switch, then the
    /// capability checks against the final route.
    pub fn resolve(
        &self,
        model_id: &str,
        reference_count: usize,
        count: u32,
    ) -> Result<ResolvedModel, ProviderError> {
        let mut entry = self
            .lookup(model_id)
            .ok_or_else(|| ProviderError::UnknownModel(model_id.to_string()))?;

        if reference_count > 0 {
            if let Some(variant) = entry.0.with_references {
                entry = self
                    .lookup(variant)
                    .ok_or_else(|| ProviderError::UnknownModel(variant.to_string()))?;
            }
        }
        let (route, adapter) = entry;

        let model = route.model_id.to_string();
        if reference_count == 0 && route.requires_reference_inputs {
            return Err(ProviderError::MissingReferenceInputs { model });
        }
        if reference_count > 0 && route.max_reference_inputs == 0 {
            return Err(ProviderError::UnsupportedReferenceInputs { model });
        }
        if reference_count > route.max_reference_inputs {
            return Err(ProviderError::TooManyReferenceInputs {
                model,
                max: route.max_reference_inputs,
                got: reference_count,
            });
        }
        if count > route.max_outputs {
            return Err(ProviderError::TooManyOutputs {
                model,
                max: route.max_outputs,
                got: count,
            });
        }

        Ok(ResolvedModel {
            model_id: route.model_id,
            adapter: adapter.clone(),
        })
    }

    /// Canonical ids of every registered model.
    pub fn model_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.routes.keys().copied()
    }

    fn lookup(&self, model_id: &str) -> Option<&(ModelRoute, Arc<dyn ProviderAdapter>)> {
        self.routes.get(model_id).or_else(|| {
            self.aliases
                .get(model_id)
                .and_then(|canonical| self.routes.get(canonical))
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use atelier_core::catalog;
    use atelier_core::task_state::TaskState;

    use super::*;
    use crate::adapter::{CreatedTask, TaskRequest, TaskSnapshot};

    struct NamedAdapter(&'static str);

    #[async_trait]
    impl ProviderAdapter for NamedAdapter {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn create_task(
            &self,
            _request: &TaskRequest,
            _callback_url: &str,
        ) -> Result<CreatedTask, ProviderError> {
            Ok(CreatedTask {
                remote_task_id: "t".to_string(),
            })
        }

        async fn query_task(
            &self,
            _model: &str,
            remote_task_id: &str,
        ) -> Result<TaskSnapshot, ProviderError> {
            Ok(TaskSnapshot::pending(remote_task_id, TaskState::Waiting))
        }
    }

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register_all(JOBS_API_ROUTES, Arc::new(NamedAdapter("jobs")));
        registry.register_all(GPT_IMAGE_ROUTES, Arc::new(NamedAdapter("gpt")));
        registry.register_all(VEO_ROUTES, Arc::new(NamedAdapter("veo")));
        registry
    }

    #[test]
    fn exact_match_wins() {
        let resolved = registry().resolve("gpt4o-image", 0, 2).unwrap();
        assert_eq!(resolved.model_id, "gpt4o-image");
        assert_eq!(resolved.adapter.name(), "gpt");
    }

    #[test]
    fn alias_resolves_to_canonical_model() {
        let r = registry();
        assert_eq!(r.resolve("kling", 0, 1).unwrap().model_id, "kling/v2-5-turbo");
        assert_eq!(r.resolve("veo", 0, 1).unwrap().adapter.name(), "veo");
        assert_eq!(r.resolve("nano-banana", 0, 1).unwrap().model_id, "google/nano-banana");
    }

    #[test]
    fn reference_inputs_switch_generate_to_edit() {
        let r = registry();
        assert_eq!(
            r.resolve("google/nano-banana", 1, 1).unwrap().model_id,
            "google/nano-banana-edit"
        );
        assert_eq!(
            r.resolve("flux-2/pro-text-to-image", 2, 1).unwrap().model_id,
            "flux-2/pro-image-to-image"
        );
        assert_eq!(
            r.resolve("google/nano-banana", 0, 1).unwrap().model_id,
            "google/nano-banana"
        );
    }

    #[test]
    fn edit_variant_without_references_is_rejected() {
        assert_matches!(
            registry().resolve("google/nano-banana-edit", 0, 1),
            Err(ProviderError::MissingReferenceInputs { .. })
        );
    }

    #[test]
    fn references_on_text_only_model_are_rejected() {
        assert_matches!(
            registry().resolve("z-image", 1, 1),
            Err(ProviderError::UnsupportedReferenceInputs { model }) if model == "z-image"
        );
    }

    #[test]
    fn too_many_references_and_outputs_are_rejected() {
        let r = registry();
        assert_matches!(
            r.resolve("kling/v2-5-turbo", 2, 1),
            Err(ProviderError::TooManyReferenceInputs { max: 1, got: 2, .. })
        );
        assert_matches!(
            r.resolve("sora-2", 0, 2),
            Err(ProviderError::TooManyOutputs { max: 1, got: 2, .. })
        );
    }

    #[test]
    fn unknown_model_is_rejected() {
        assert_matches!(
            registry().resolve("midjourney", 0, 1),
            Err(ProviderError::UnknownModel(m)) if m == "midjourney"
        );
    }

    #[test]
    fn every_route_has_a_catalog_price() {
        let r = registry();
        for id in r.model_ids() {
            assert!(catalog::find_model(id).is_some(), "no catalog entry for {id}");
        }
        assert_eq!(r.model_ids().count(), catalog::MODELS.len());
    }
}
