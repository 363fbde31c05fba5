//! Network remapping configuration

use super::defaults::*;
use crate::error::{VmigrateError, VmigrateResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Substrings (case-insensitive, in priority order) identifying a
    /// fallback network when a mapped network is missing at the destination
    pub fallback_markers: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            fallback_markers: DEFAULT_FALLBACK_NETWORK_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> VmigrateResult<()> {
        if self.fallback_markers.iter().any(|m| m.trim().is_empty()) {
            return Err(VmigrateError::ConfigError(
                "fallback_markers must not contain empty entries".to_string(),
            ));
        }
        Ok(())
    }
}
