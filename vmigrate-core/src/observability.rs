//! Logging setup and span helpers
//!
//! All components log through `tracing`; this module installs the
//! subscriber that acts as the run's logging sink.

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the global subscriber from configuration
///
/// Events go to stderr so that stdout carries only the run report.
/// `RUST_LOG`, when set, takes precedence over the configured level. Calling
/// this more than once is harmless; only the first subscriber is installed.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "vmigrate={level},vmigrate_core={level}",
            level = config.level
        ))
    });

    let registry = Registry::default().with(env_filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(config.with_target))
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(config.with_target),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(config.with_target),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
}

/// Create a span for one migration job
#[inline]
pub fn job_span(workload: &str, sequence: usize) -> Span {
    tracing::info_span!(
        "migration",
        workload = %workload,
        seq = sequence,
        phase = tracing::field::Empty,
    )
}

/// Create a span for the setup phase of a run
#[inline]
pub fn setup_span(source: &str, target: &str) -> Span {
    tracing::info_span!("setup", source = %source, target = %target)
}
