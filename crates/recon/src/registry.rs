use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::{build_adapter, FirmAdapter};
use crate::config::FirmsConfig;
use crate::error::ReconError;

/// Read-only `firm_id -> adapter` table, built once at startup.
///
/// Adapters are stateless and shared; concurrent runs resolve from the same
/// registry without locking.
#[derive(Debug, Clone, Default)]
pub struct FirmRegistry {
    adapters: HashMap<String, Arc<dyn FirmAdapter>>,
}

impl FirmRegistry {
    pub fn from_config(config: &FirmsConfig) -> Self {
        let adapters = config
            .firms
            .iter()
            .map(|(firm_id, firm)| (firm_id.clone(), build_adapter(&firm.adapter)))
            .collect();
        Self { adapters }
    }

    /// Register adapters directly, for firms whose logic is not expressible
    /// through configuration.
    pub fn with_adapters(
        adapters: impl IntoIterator<Item = (String, Arc<dyn FirmAdapter>)>,
    ) -> Self {
        Self {
            adapters: adapters.into_iter().collect(),
        }
    }

    pub fn resolve(&self, firm_id: &str) -> Result<Arc<dyn FirmAdapter>, ReconError> {
        self.adapters
            .get(firm_id)
            .cloned()
            .ok_or_else(|| ReconError::FirmNotConfigured {
                firm_id: firm_id.to_string(),
            })
    }

    /// Registered firm ids, sorted.
    pub fn firms(&self) -> Vec<&str> {
        let mut firms: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        firms.sort_unstable();
        firms
    }
}
