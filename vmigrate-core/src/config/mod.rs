//! Configuration for migration runs
//!
//! Tunables live here (concurrency, timeouts, placement buffer, fallback
//! networks, logging, provider selection). Per-run inputs such as the list of
//! workloads are carried by [`crate::plan::MigrationPlan`] instead.
//!
//! Sources are layered: defaults, then an optional TOML file, then
//! `VMIGRATE_*` environment variables. The result is validated before use.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{VmigrateError, VmigrateResult};

pub mod defaults;
pub mod logging;
pub mod network;
pub mod placement;
pub mod provider;
pub mod scheduler;

pub use defaults::*;
pub use logging::{LogFormat, LoggingConfig};
pub use network::NetworkConfig;
pub use placement::PlacementConfig;
pub use provider::ProviderConfig;
pub use scheduler::SchedulerConfig;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VmigrateConfig {
    /// Worker pool configuration
    pub scheduler: SchedulerConfig,

    /// Host/datastore selection configuration
    pub placement: PlacementConfig,

    /// Network remapping configuration
    pub network: NetworkConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Domain provider configuration
    pub provider: ProviderConfig,
}

impl VmigrateConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> VmigrateResult<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            VmigrateError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let mut config: VmigrateConfig = toml::from_str(&contents)
            .map_err(|e| VmigrateError::ConfigError(format!("Failed to parse TOML: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> VmigrateResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> VmigrateResult<()> {
        self.scheduler.apply_env_overrides()?;

        if let Ok(level) = std::env::var("VMIGRATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("VMIGRATE_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Ok(kind) = std::env::var("VMIGRATE_PROVIDER") {
            self.provider.kind = kind;
        }
        if let Ok(path) = std::env::var("VMIGRATE_INVENTORY") {
            self.provider.inventory = Some(PathBuf::from(path));
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> VmigrateResult<()> {
        self.scheduler.validate()?;
        self.placement.validate()?;
        self.network.validate()?;
        self.logging.validate()?;
        self.provider.validate()?;
        Ok(())
    }
}

/// Builder for VmigrateConfig
pub struct VmigrateConfigBuilder {
    config: VmigrateConfig,
}

impl VmigrateConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: VmigrateConfig::default(),
        }
    }

    pub fn max_concurrency(mut self, concurrency: usize) -> Self {
        self.config.scheduler.max_concurrency = concurrency;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.config.scheduler.max_concurrency = 1;
        self
    }

    pub fn relocate_timeout(mut self, timeout: Duration) -> Self {
        self.config.scheduler.relocate_timeout = timeout;
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.config.scheduler.progress_interval = interval;
        self
    }

    pub fn datastore_space_buffer(mut self, buffer: f64) -> Self {
        self.config.placement.datastore_space_buffer = buffer;
        self
    }

    pub fn fallback_markers(mut self, markers: Vec<String>) -> Self {
        self.config.network.fallback_markers = markers;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn provider(mut self, kind: impl Into<String>) -> Self {
        self.config.provider.kind = kind.into();
        self
    }

    pub fn inventory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.provider.inventory = Some(path.into());
        self
    }

    pub fn build(self) -> VmigrateResult<VmigrateConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for VmigrateConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole seconds from `key`, or `default` when unset
pub(crate) fn parse_duration_secs_from_env(key: &str, default: Duration) -> VmigrateResult<Duration> {
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| VmigrateError::ConfigError(format!("Invalid {}: '{}'", key, val))),
        Err(_) => Ok(default),
    }
}
