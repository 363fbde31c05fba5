//! Job scheduler configuration

use super::defaults::*;
use super::parse_duration_secs_from_env;
use crate::error::{VmigrateError, VmigrateResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of migrations in flight (1 = sequential)
    pub max_concurrency: usize,

    /// How often the scheduler reports progress while waiting on jobs
    #[serde(with = "humantime_serde")]
    pub progress_interval: Duration,

    /// Upper bound on a single relocate operation
    #[serde(with = "humantime_serde")]
    pub relocate_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            progress_interval: duration_secs(DEFAULT_PROGRESS_INTERVAL_SECS),
            relocate_timeout: duration_secs(DEFAULT_RELOCATE_TIMEOUT_SECS),
        }
    }
}

impl SchedulerConfig {
    /// Strictly sequential processing in submission order
    pub fn sequential() -> Self {
        Self {
            max_concurrency: 1,
            ..Self::default()
        }
    }

    /// Load scheduler configuration from environment variables
    pub fn from_env() -> VmigrateResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) -> VmigrateResult<()> {
        if let Ok(val) = std::env::var("VMIGRATE_MAX_CONCURRENCY") {
            self.max_concurrency = val.parse().map_err(|_| {
                VmigrateError::ConfigError("Invalid VMIGRATE_MAX_CONCURRENCY".to_string())
            })?;
        }

        self.progress_interval =
            parse_duration_secs_from_env("VMIGRATE_PROGRESS_INTERVAL_SECS", self.progress_interval)?;
        self.relocate_timeout =
            parse_duration_secs_from_env("VMIGRATE_RELOCATE_TIMEOUT_SECS", self.relocate_timeout)?;

        Ok(())
    }

    /// Validate scheduler configuration
    pub fn validate(&self) -> VmigrateResult<()> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.max_concurrency) {
            return Err(VmigrateError::ConfigError(format!(
                "max_concurrency must be between {} and {} (got {})",
                MIN_CONCURRENCY, MAX_CONCURRENCY, self.max_concurrency
            )));
        }

        if self.progress_interval.is_zero() {
            return Err(VmigrateError::ConfigError(
                "progress_interval must be non-zero".to_string(),
            ));
        }

        if self.relocate_timeout < Duration::from_secs(1) {
            return Err(VmigrateError::ConfigError(
                "relocate_timeout too small (min 1s)".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_sequential(&self) -> bool {
        self.max_concurrency == 1
    }
}
