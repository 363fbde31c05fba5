//! Default configuration values for vmigrate
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Scheduler defaults
pub const DEFAULT_MAX_CONCURRENCY: usize = 2;
pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_RELOCATE_TIMEOUT_SECS: u64 = 600; // 10 minutes

// Placement defaults
pub const DEFAULT_DATASTORE_SPACE_BUFFER: f64 = 1.2;

// Network remapping defaults
pub const DEFAULT_FALLBACK_NETWORK_MARKERS: &[&str] = &["management", "vm"];

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Provider defaults
pub const DEFAULT_PROVIDER_KIND: &str = "memory";

// Helper functions for Duration creation
pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
