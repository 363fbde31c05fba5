//! Run input: what to move, where, and how

use serde::{Deserialize, Serialize};

use crate::error::{VmigrateError, VmigrateResult};
use crate::network_remap::RemapOptions;
use crate::types::{DiskFormat, DomainEndpoint, NetworkMapping};

/// Per-run migration options, shared by every workload in the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationOptions {
    /// Appended to each workload's name after a successful move
    pub name_suffix: Option<String>,
    pub preserve_mac: bool,
    pub disk_format: DiskFormat,
    /// Network failures degrade the item instead of failing it
    pub ignore_network_errors: bool,
    pub disconnect_before_remap: bool,
    /// Fall back to a marker-matched network when a mapped one is missing
    pub enhanced_network_handling: bool,
}

impl MigrationOptions {
    pub fn remap_options(&self) -> RemapOptions {
        RemapOptions {
            preserve_mac: self.preserve_mac,
            disconnect_first: self.disconnect_before_remap,
            allow_fallback: self.enhanced_network_handling,
        }
    }

    /// Suffix to apply, ignoring an empty string
    pub fn effective_suffix(&self) -> Option<&str> {
        self.name_suffix.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub source: DomainEndpoint,
    pub target: DomainEndpoint,
    /// Workload names, in submission order
    pub workloads: Vec<String>,
    #[serde(default)]
    pub destination_cluster: Option<String>,
    #[serde(default)]
    pub destination_datastore: Option<String>,
    #[serde(default)]
    pub network_mapping: NetworkMapping,
    #[serde(default)]
    pub options: MigrationOptions,
}

impl MigrationPlan {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: DomainEndpoint::new(source),
            target: DomainEndpoint::new(target),
            workloads: Vec::new(),
            destination_cluster: None,
            destination_datastore: None,
            network_mapping: NetworkMapping::new(),
            options: MigrationOptions::default(),
        }
    }

    pub fn workload(mut self, name: impl Into<String>) -> Self {
        self.workloads.push(name.into());
        self
    }

    pub fn workloads<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workloads.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn destination_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.destination_cluster = Some(cluster.into());
        self
    }

    pub fn destination_datastore(mut self, datastore: impl Into<String>) -> Self {
        self.destination_datastore = Some(datastore.into());
        self
    }

    pub fn map_network(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.network_mapping.insert(source, target);
        self
    }

    pub fn options(mut self, options: MigrationOptions) -> Self {
        self.options = options;
        self
    }

    /// Reject plans that cannot start
    pub fn validate(&self) -> VmigrateResult<()> {
        if self.source.address.trim().is_empty() {
            return Err(VmigrateError::invalid_input("source", "source address is empty"));
        }
        if self.target.address.trim().is_empty() {
            return Err(VmigrateError::invalid_input("target", "target address is empty"));
        }
        if self.source.address == self.target.address {
            return Err(VmigrateError::invalid_input(
                "target",
                format!("source and target are both '{}'", self.source.address),
            ));
        }
        if self.workloads.iter().all(|w| w.trim().is_empty()) {
            return Err(VmigrateError::invalid_input("workloads", "no workloads requested"));
        }
        if let Some(suffix) = &self.options.name_suffix {
            if suffix.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
                return Err(VmigrateError::invalid_input(
                    "name_suffix",
                    format!("'{}' contains path separators or control characters", suffix),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_validation() {
        let plan = MigrationPlan::new("src", "dst").workload("web01");
        assert!(plan.validate().is_ok());

        assert!(MigrationPlan::new("src", "dst").validate().is_err());
        assert!(MigrationPlan::new("src", "src").workload("a").validate().is_err());
        assert!(MigrationPlan::new("", "dst").workload("a").validate().is_err());

        let mut bad_suffix = plan.clone();
        bad_suffix.options.name_suffix = Some("-new/x".into());
        let err = bad_suffix.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_options_translate_to_remap_options() {
        let options = MigrationOptions {
            preserve_mac: true,
            enhanced_network_handling: true,
            name_suffix: Some(String::new()),
            ..Default::default()
        };
        let remap = options.remap_options();
        assert!(remap.preserve_mac);
        assert!(remap.allow_fallback);
        assert!(!remap.disconnect_first);
        assert_eq!(options.effective_suffix(), None);
    }

    #[test]
    fn test_network_fallback_is_opt_in() {
        let remap = MigrationOptions::default().remap_options();
        assert!(!remap.allow_fallback);
        assert!(!remap.disconnect_first);
    }

    #[test]
    fn test_plan_deserializes_with_defaults() {
        let plan: MigrationPlan = serde_json::from_str(
            r#"{"source":{"address":"a"},"target":{"address":"b"},"workloads":["x"],
                "network_mapping":{"VM Network":"Prod"}}"#,
        )
        .unwrap();
        assert_eq!(plan.network_mapping.target_for("VM Network"), "Prod");
        assert_eq!(plan.options.disk_format, DiskFormat::Thin);
    }
}
