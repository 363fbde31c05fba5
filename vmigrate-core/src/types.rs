use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::VmigrateError;

/// Identifies one workload (VM) inside a management domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub name: String,
    /// Opaque, domain-assigned identifier
    pub id: String,
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Resources a workload needs at its destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub used_space_gb: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostConnectionState {
    Connected,
    Disconnected,
    NotResponding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPowerState {
    PoweredOn,
    PoweredOff,
    Standby,
}

/// A destination host as reported by the target domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCandidate {
    pub id: String,
    pub name: String,
    pub cluster: String,
    pub connection_state: HostConnectionState,
    pub power_state: HostPowerState,
    pub cpu_cores: u32,
    pub cpu_capacity_mhz: u64,
    pub cpu_usage_mhz: u64,
    pub memory_capacity_mb: u64,
    pub memory_usage_mb: u64,
}

impl HostCandidate {
    pub fn is_available(&self) -> bool {
        self.connection_state == HostConnectionState::Connected
            && self.power_state == HostPowerState::PoweredOn
    }

    pub fn cpu_usage_ratio(&self) -> f64 {
        if self.cpu_capacity_mhz == 0 {
            return 1.0;
        }
        self.cpu_usage_mhz as f64 / self.cpu_capacity_mhz as f64
    }

    pub fn memory_usage_ratio(&self) -> f64 {
        if self.memory_capacity_mb == 0 {
            return 1.0;
        }
        self.memory_usage_mb as f64 / self.memory_capacity_mb as f64
    }

    pub fn free_memory_mb(&self) -> u64 {
        self.memory_capacity_mb.saturating_sub(self.memory_usage_mb)
    }

    /// Check whether the host can take a workload of the given size
    pub fn can_accommodate(&self, cpu_count: u32, memory_mb: u64) -> bool {
        self.cpu_cores >= cpu_count && self.free_memory_mb() >= memory_mb
    }
}

/// A destination datastore as reported by the target domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastoreCandidate {
    pub id: String,
    pub name: String,
    pub capacity_gb: f64,
    pub free_space_gb: f64,
    pub accessible: bool,
}

impl DatastoreCandidate {
    pub fn free_ratio(&self) -> f64 {
        if self.capacity_gb <= 0.0 {
            return 0.0;
        }
        self.free_space_gb / self.capacity_gb
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRef {
    pub id: String,
    pub name: String,
}

/// Disk provisioning format applied during relocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiskFormat {
    #[default]
    Thin,
    Thick,
    EagerZeroedThick,
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiskFormat::Thin => "thin",
            DiskFormat::Thick => "thick",
            DiskFormat::EagerZeroedThick => "eager-zeroed-thick",
        };
        f.write_str(name)
    }
}

impl FromStr for DiskFormat {
    type Err = VmigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "thin" => Ok(DiskFormat::Thin),
            "thick" => Ok(DiskFormat::Thick),
            "eager-zeroed-thick" | "eagerzeroedthick" => Ok(DiskFormat::EagerZeroedThick),
            other => Err(VmigrateError::invalid_input(
                "disk_format",
                format!("unknown disk format '{}' (expected thin, thick or eager-zeroed-thick)", other),
            )),
        }
    }
}

/// Which inventory tree a node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Folder,
    ResourcePool,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Folder => f.write_str("folder"),
            EntityKind::ResourcePool => f.write_str("resource pool"),
        }
    }
}

/// One node of a folder or resource-pool tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryNode {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkBacking {
    Distributed,
    Standard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRef {
    pub id: String,
    pub name: String,
    pub backing: NetworkBacking,
}

/// Network adapter state captured from a workload before it moves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAdapterSnapshot {
    pub name: String,
    pub network_name: String,
    pub mac_address: String,
    pub connected: bool,
    pub start_connected: bool,
    pub distributed: bool,
}

/// Desired state of one adapter after remapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterAssignment {
    pub network: NetworkRef,
    /// Explicit MAC to set; `None` keeps whatever the domain assigned
    pub mac_address: Option<String>,
    pub connected: bool,
    pub start_connected: bool,
}

/// Cross-domain relocation target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocateSpec {
    pub target_address: String,
    pub host_id: String,
    pub datastore_id: String,
    pub disk_format: DiskFormat,
}

/// Source network name -> destination network name
///
/// Networks without an entry map to themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkMapping(HashMap<String, String>);

impl NetworkMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.0.insert(source.into(), target.into());
    }

    /// Resolve the destination network for a source network
    pub fn target_for<'a>(&'a self, source: &'a str) -> &'a str {
        self.0.get(source).map(String::as_str).unwrap_or(source)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a `SOURCE=TARGET` entry
    pub fn parse_entry(entry: &str) -> Result<(String, String), VmigrateError> {
        let (source, target) = entry.split_once('=').ok_or_else(|| {
            VmigrateError::invalid_input(
                "network_map",
                format!("expected SOURCE=TARGET, got '{}'", entry),
            )
        })?;
        let (source, target) = (source.trim(), target.trim());
        if source.is_empty() || target.is_empty() {
            return Err(VmigrateError::invalid_input(
                "network_map",
                format!("empty network name in '{}'", entry),
            ));
        }
        Ok((source.to_string(), target.to_string()))
    }
}

impl FromIterator<(String, String)> for NetworkMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Address of a management domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainEndpoint {
    pub address: String,
}

impl DomainEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl fmt::Display for DomainEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Opaque login material handed to the connection provider
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(cpu_used: u64, mem_used: u64) -> HostCandidate {
        HostCandidate {
            id: "host-1".into(),
            name: "esx1".into(),
            cluster: "c1".into(),
            connection_state: HostConnectionState::Connected,
            power_state: HostPowerState::PoweredOn,
            cpu_cores: 16,
            cpu_capacity_mhz: 32_000,
            cpu_usage_mhz: cpu_used,
            memory_capacity_mb: 65_536,
            memory_usage_mb: mem_used,
        }
    }

    #[test]
    fn test_host_ratios() {
        let h = host(8_000, 16_384);
        assert!((h.cpu_usage_ratio() - 0.25).abs() < f64::EPSILON);
        assert!((h.memory_usage_ratio() - 0.25).abs() < f64::EPSILON);
        assert!(h.can_accommodate(16, 49_152));
        assert!(!h.can_accommodate(17, 1));
        assert!(!h.can_accommodate(1, 49_153));
    }

    #[test]
    fn test_network_mapping_defaults_to_identity() {
        let mut mapping = NetworkMapping::new();
        mapping.insert("Prod-A", "Prod-B");
        assert_eq!(mapping.target_for("Prod-A"), "Prod-B");
        assert_eq!(mapping.target_for("VM Network"), "VM Network");
    }

    #[test]
    fn test_network_mapping_entry_parsing() {
        assert_eq!(
            NetworkMapping::parse_entry(" a = b ").unwrap(),
            ("a".to_string(), "b".to_string())
        );
        assert!(NetworkMapping::parse_entry("a").is_err());
        assert!(NetworkMapping::parse_entry("=b").is_err());
    }

    #[test]
    fn test_disk_format_parsing() {
        assert_eq!("thin".parse::<DiskFormat>().unwrap(), DiskFormat::Thin);
        assert_eq!(
            "EagerZeroedThick".parse::<DiskFormat>().unwrap(),
            DiskFormat::EagerZeroedThick
        );
        assert_eq!(
            "eager_zeroed_thick".parse::<DiskFormat>().unwrap(),
            DiskFormat::EagerZeroedThick
        );
        assert!("sparse".parse::<DiskFormat>().is_err());
        assert_eq!(DiskFormat::EagerZeroedThick.to_string(), "eager-zeroed-thick");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
