//! Explicit container of the collaborators every pipeline component uses.

use std::sync::Arc;

use atelier_providers::ProviderRegistry;

use crate::config::PipelineConfig;
use crate::store::{CreditLedger, JobStore};

/// Built once at startup and shared by reference.
pub struct Services {
    pub store: Arc<dyn JobStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub registry: Arc<ProviderRegistry>,
    pub config: PipelineConfig,
}

impl Services {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn CreditLedger>,
        registry: Arc<ProviderRegistry>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            ledger,
            registry,
            config,
        })
    }
}
