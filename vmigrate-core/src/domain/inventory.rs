//! Declarative inventory for the in-memory provider
//!
//! An inventory file describes one or more domains. Paths (folders, resource
//! pools) are written with `/` separators and are relative to the
//! datacenter's VM root folder or the cluster's root pool.
//!
//! ```yaml
//! domains:
//!   - address: vc-src.example
//!     datacenters:
//!       - name: DC1
//!         folders: ["Prod/Web"]
//!         datastores:
//!           - { name: ds1, capacity_gb: 1000, free_space_gb: 600 }
//!         networks:
//!           - { name: "VM Network" }
//!         clusters:
//!           - name: C1
//!             hosts:
//!               - { name: esx1, cpu_cores: 32, cpu_capacity_mhz: 64000,
//!                   memory_capacity_mb: 262144, datastores: [ds1] }
//!         workloads:
//!           - name: web01
//!             cluster: C1
//!             cpu_count: 2
//!             memory_mb: 4096
//!             used_space_gb: 40
//!             folder: Prod/Web
//!             adapters: [{ network: "VM Network" }]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{VmigrateError, VmigrateResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySpec {
    #[serde(default)]
    pub domains: Vec<DomainSpec>,
}

impl InventorySpec {
    /// Load an inventory from YAML (JSON is accepted as well)
    pub fn from_file<P: AsRef<Path>>(path: P) -> VmigrateResult<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            VmigrateError::ConfigError(format!(
                "Failed to read inventory {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> VmigrateResult<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSpec {
    pub address: String,
    /// When set, connections must present exactly these credentials
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub datacenters: Vec<DatacenterSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacenterSpec {
    pub name: String,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
    #[serde(default)]
    pub datastores: Vec<DatastoreSpec>,
    #[serde(default)]
    pub networks: Vec<NetworkSpec>,
    #[serde(default)]
    pub workloads: Vec<WorkloadSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    #[serde(default)]
    pub resource_pools: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<HostSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    pub cpu_cores: u32,
    pub cpu_capacity_mhz: u64,
    #[serde(default)]
    pub cpu_usage_mhz: u64,
    pub memory_capacity_mb: u64,
    #[serde(default)]
    pub memory_usage_mb: u64,
    #[serde(default = "default_true")]
    pub connected: bool,
    #[serde(default = "default_true")]
    pub powered_on: bool,
    #[serde(default)]
    pub datastores: Vec<String>,
}

impl HostSpec {
    /// Idle, connected host with 2 GHz cores
    pub fn new(name: impl Into<String>, cpu_cores: u32, memory_capacity_mb: u64) -> Self {
        Self {
            name: name.into(),
            cpu_cores,
            cpu_capacity_mhz: cpu_cores as u64 * 2_000,
            cpu_usage_mhz: 0,
            memory_capacity_mb,
            memory_usage_mb: 0,
            connected: true,
            powered_on: true,
            datastores: Vec::new(),
        }
    }

    pub fn usage(mut self, cpu_usage_mhz: u64, memory_usage_mb: u64) -> Self {
        self.cpu_usage_mhz = cpu_usage_mhz;
        self.memory_usage_mb = memory_usage_mb;
        self
    }

    pub fn mount(mut self, datastore: impl Into<String>) -> Self {
        self.datastores.push(datastore.into());
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn powered_off(mut self) -> Self {
        self.powered_on = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreSpec {
    pub name: String,
    pub capacity_gb: f64,
    pub free_space_gb: f64,
    #[serde(default = "default_true")]
    pub accessible: bool,
}

impl DatastoreSpec {
    pub fn new(name: impl Into<String>, capacity_gb: f64, free_space_gb: f64) -> Self {
        Self {
            name: name.into(),
            capacity_gb,
            free_space_gb,
            accessible: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    #[serde(default)]
    pub distributed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    pub cluster: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub used_space_gb: f64,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub resource_pool: String,
    #[serde(default)]
    pub adapters: Vec<AdapterSpec>,
}

impl WorkloadSpec {
    pub fn new(name: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
            cpu_count: 2,
            memory_mb: 4_096,
            used_space_gb: 40.0,
            folder: String::new(),
            resource_pool: String::new(),
            adapters: Vec::new(),
        }
    }

    pub fn size(mut self, cpu_count: u32, memory_mb: u64, used_space_gb: f64) -> Self {
        self.cpu_count = cpu_count;
        self.memory_mb = memory_mb;
        self.used_space_gb = used_space_gb;
        self
    }

    pub fn folder(mut self, path: impl Into<String>) -> Self {
        self.folder = path.into();
        self
    }

    pub fn resource_pool(mut self, path: impl Into<String>) -> Self {
        self.resource_pool = path.into();
        self
    }

    pub fn adapter(mut self, network: impl Into<String>) -> Self {
        self.adapters.push(AdapterSpec {
            name: None,
            network: network.into(),
            mac: None,
            connected: true,
            start_connected: true,
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSpec {
    /// Defaults to "Network adapter N" by position
    #[serde(default)]
    pub name: Option<String>,
    pub network: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default = "default_true")]
    pub connected: bool,
    #[serde(default = "default_true")]
    pub start_connected: bool,
}

fn default_true() -> bool {
    true
}

/// Split a `/`-separated inventory path into segments
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inventory_yaml() {
        let yaml = r#"
domains:
  - address: vc-src.example
    username: admin
    password: secret
    datacenters:
      - name: DC1
        folders: ["Prod/Web"]
        datastores:
          - { name: ds1, capacity_gb: 1000, free_space_gb: 600 }
        networks:
          - { name: "VM Network" }
          - { name: "dvPG-Prod", distributed: true }
        clusters:
          - name: C1
            hosts:
              - { name: esx1, cpu_cores: 32, cpu_capacity_mhz: 64000, memory_capacity_mb: 262144, datastores: [ds1] }
        workloads:
          - name: web01
            cluster: C1
            cpu_count: 2
            memory_mb: 4096
            used_space_gb: 40
            folder: Prod/Web
            adapters: [{ network: "VM Network" }]
"#;
        let spec = InventorySpec::from_yaml(yaml).unwrap();
        let domain = &spec.domains[0];
        assert_eq!(domain.username.as_deref(), Some("admin"));
        let dc = &domain.datacenters[0];
        assert!(dc.networks[1].distributed);
        assert!(dc.clusters[0].hosts[0].connected);
        assert_eq!(dc.workloads[0].adapters[0].network, "VM Network");
        assert!(dc.workloads[0].adapters[0].start_connected);
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("Prod/ Web /"), vec!["Prod", "Web"]);
        assert!(split_path("").is_empty());
    }
}
