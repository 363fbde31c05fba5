//! Domain provider selection

use super::defaults::*;
use crate::error::{VmigrateError, VmigrateResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Registered provider kind used to reach both domains
    pub kind: String,

    /// Inventory file consumed by the in-memory provider
    pub inventory: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: DEFAULT_PROVIDER_KIND.to_string(),
            inventory: None,
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> VmigrateResult<()> {
        if self.kind.trim().is_empty() {
            return Err(VmigrateError::ConfigError(
                "provider kind cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
