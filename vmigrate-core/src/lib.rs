pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod executor;
pub mod hierarchy;
pub mod network_remap;
pub mod observability;
pub mod orchestrator;
pub mod placement;
pub mod plan;
pub mod request_builder;
pub mod results;
pub mod scheduler;
pub mod types;

// Test helpers are exposed for integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::VmigrateConfig;
pub use error::{ErrorKind, VmigrateError, VmigrateResult};
pub use orchestrator::MigrationOrchestrator;
pub use plan::{MigrationOptions, MigrationPlan};
pub use results::{MigrationSummary, RunOutcome};
