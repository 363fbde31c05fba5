//! Placement heuristics configuration

use super::defaults::*;
use crate::error::{VmigrateError, VmigrateResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Datastores must have more than `required_space * buffer` free
    pub datastore_space_buffer: f64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            datastore_space_buffer: DEFAULT_DATASTORE_SPACE_BUFFER,
        }
    }
}

impl PlacementConfig {
    pub fn validate(&self) -> VmigrateResult<()> {
        if !self.datastore_space_buffer.is_finite() || self.datastore_space_buffer < 1.0 {
            return Err(VmigrateError::ConfigError(format!(
                "datastore_space_buffer must be >= 1.0 (got {})",
                self.datastore_space_buffer
            )));
        }
        Ok(())
    }
}
