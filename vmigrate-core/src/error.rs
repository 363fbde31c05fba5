//! Error taxonomy for migration runs
//!
//! Every fallible operation returns [`VmigrateResult`]. Errors fall into two
//! groups:
//!
//! - **Setup errors** abort the whole run before any job is scheduled
//!   (cannot reach a domain, destination cluster or datastore missing, no
//!   workloads resolved, invalid configuration).
//! - **Per-item errors** (placement, hierarchy, network, execution) are caught
//!   at the executor boundary and turned into a `FailureRecord`; they never
//!   leave the job that raised them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VmigrateError {
    #[error("Setup failed: {message}")]
    Setup { message: String },

    #[error("Connection error to {address}: {details}")]
    Connection { address: String, details: String },

    #[error("No eligible placement for '{workload}': {message}")]
    Placement { workload: String, message: String },

    #[error("Hierarchy error at '{path}': {message}")]
    Hierarchy { path: String, message: String },

    #[error("Network error on adapter '{adapter}': {message}")]
    Network { adapter: String, message: String },

    #[error("Operation '{operation}' failed: {details}")]
    Execution { operation: String, details: String },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Already exists: {resource}")]
    AlreadyExists { resource: String },

    #[error("Invalid input for {field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type VmigrateResult<T> = std::result::Result<T, VmigrateError>;

/// Reporting category of an error, as shown in the final summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Setup,
    Connection,
    Lookup,
    Placement,
    Hierarchy,
    Network,
    Execution,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Setup => "SetupError",
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Lookup => "LookupError",
            ErrorKind::Placement => "PlacementError",
            ErrorKind::Hierarchy => "HierarchyError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Execution => "ExecutionError",
        };
        f.write_str(name)
    }
}

impl VmigrateError {
    pub fn setup(message: impl Into<String>) -> Self {
        VmigrateError::Setup {
            message: message.into(),
        }
    }

    pub fn connection(address: impl Into<String>, details: impl Into<String>) -> Self {
        VmigrateError::Connection {
            address: address.into(),
            details: details.into(),
        }
    }

    pub fn placement(workload: impl Into<String>, message: impl Into<String>) -> Self {
        VmigrateError::Placement {
            workload: workload.into(),
            message: message.into(),
        }
    }

    pub fn hierarchy(path: impl Into<String>, message: impl Into<String>) -> Self {
        VmigrateError::Hierarchy {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn network(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        VmigrateError::Network {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    pub fn execution(operation: impl Into<String>, details: impl Into<String>) -> Self {
        VmigrateError::Execution {
            operation: operation.into(),
            details: details.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        VmigrateError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        VmigrateError::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Natural reporting category of this error when no phase overrides it
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmigrateError::Setup { .. }
            | VmigrateError::ConfigError(_)
            | VmigrateError::InvalidInput { .. } => ErrorKind::Setup,
            VmigrateError::Connection { .. } => ErrorKind::Connection,
            VmigrateError::NotFound { .. } => ErrorKind::Lookup,
            VmigrateError::Placement { .. } => ErrorKind::Placement,
            VmigrateError::Hierarchy { .. } | VmigrateError::AlreadyExists { .. } => {
                ErrorKind::Hierarchy
            }
            VmigrateError::Network { .. } => ErrorKind::Network,
            _ => ErrorKind::Execution,
        }
    }

    /// Only setup-phase failures abort a run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmigrateError::Setup { .. }
                | VmigrateError::ConfigError(_)
                | VmigrateError::InvalidInput { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(VmigrateError::setup("x").kind(), ErrorKind::Setup);
        assert_eq!(
            VmigrateError::placement("vm1", "no hosts").kind(),
            ErrorKind::Placement
        );
        assert_eq!(VmigrateError::not_found("vm1").kind(), ErrorKind::Lookup);
        assert_eq!(
            VmigrateError::Timeout {
                operation: "relocate".into(),
                duration: Duration::from_secs(1)
            }
            .kind(),
            ErrorKind::Execution
        );
    }

    #[test]
    fn test_only_setup_errors_are_fatal() {
        assert!(VmigrateError::setup("no target").is_fatal());
        assert!(VmigrateError::ConfigError("bad".into()).is_fatal());
        assert!(!VmigrateError::network("nic0", "missing").is_fatal());
        assert!(!VmigrateError::execution("relocate", "boom").is_fatal());
    }

    #[test]
    fn test_kind_display_names() {
        assert_eq!(ErrorKind::Placement.to_string(), "PlacementError");
        assert_eq!(ErrorKind::Network.to_string(), "NetworkError");
    }
}
