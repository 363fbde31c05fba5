//! Management-domain collaborator interfaces
//!
//! The orchestrator never talks to a hypervisor manager directly. It goes
//! through a [`DomainConnectionProvider`] that turns an address plus
//! credentials into a [`DomainSession`], and every inventory or movement
//! operation is a method on that session.
//!
//! Providers are pluggable: a [`DomainProviderFactory`] registers itself in a
//! [`DomainProviderRegistry`] under a kind name, and the run configuration
//! picks one by name. The built-in `memory` provider backs the test suite and
//! inventory-file dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::error::{VmigrateError, VmigrateResult};
use crate::hierarchy::HierarchyTree;
use crate::types::{
    AdapterAssignment, ClusterRef, Credentials, DatastoreCandidate, DomainEndpoint,
    HostCandidate, InventoryNode, NetworkAdapterSnapshot, NetworkRef, RelocateSpec,
    ResourceRequirements, WorkloadRef,
};

pub mod inventory;
pub mod memory;

pub use inventory::InventorySpec;
pub use memory::{InMemoryDomain, InMemoryFabric, MemoryProviderFactory};

/// Opens sessions against a management domain
///
/// Every call to `connect` yields an independent session. Jobs never share
/// sessions, so implementations must not hand out the same mutable client
/// twice.
#[async_trait]
pub trait DomainConnectionProvider: Send + Sync {
    async fn connect(
        &self,
        endpoint: &DomainEndpoint,
        credentials: &Credentials,
    ) -> VmigrateResult<Arc<dyn DomainSession>>;
}

/// An authenticated session against one management domain
///
/// Folder and resource-pool trees are reached through the [`HierarchyTree`]
/// supertrait so that path replication is written once for both kinds.
#[async_trait]
pub trait DomainSession: HierarchyTree {
    /// Address this session is connected to
    fn address(&self) -> &str;

    // Workload inventory

    async fn find_workload(&self, name: &str) -> VmigrateResult<Option<WorkloadRef>>;

    async fn workload_requirements(&self, workload: &WorkloadRef)
        -> VmigrateResult<ResourceRequirements>;

    /// Folder directly containing the workload
    async fn workload_folder(&self, workload: &WorkloadRef) -> VmigrateResult<InventoryNode>;

    /// Resource pool directly containing the workload
    async fn workload_resource_pool(&self, workload: &WorkloadRef)
        -> VmigrateResult<InventoryNode>;

    // Compute and storage inventory

    async fn find_cluster(&self, name: &str) -> VmigrateResult<Option<ClusterRef>>;

    /// Hosts in `cluster`, or every host in the domain when `None`
    async fn list_hosts(&self, cluster: Option<&ClusterRef>) -> VmigrateResult<Vec<HostCandidate>>;

    /// Datastores mounted on a host
    async fn host_datastores(&self, host_id: &str) -> VmigrateResult<Vec<DatastoreCandidate>>;

    async fn find_datastore(&self, name: &str) -> VmigrateResult<Option<DatastoreCandidate>>;

    /// VM root folder of the datacenter owning `host_id`
    async fn root_folder(&self, host_id: &str) -> VmigrateResult<InventoryNode>;

    /// Root resource pool of the cluster owning `host_id`
    async fn root_resource_pool(&self, host_id: &str) -> VmigrateResult<InventoryNode>;

    // Movement

    /// Move a workload into another domain, returning its reference there
    async fn relocate(&self, workload: &WorkloadRef, spec: &RelocateSpec)
        -> VmigrateResult<WorkloadRef>;

    async fn move_to_folder(&self, workload: &WorkloadRef, folder: &InventoryNode)
        -> VmigrateResult<()>;

    async fn move_to_resource_pool(&self, workload: &WorkloadRef, pool: &InventoryNode)
        -> VmigrateResult<()>;

    async fn rename_workload(&self, workload: &WorkloadRef, new_name: &str) -> VmigrateResult<()>;

    // Networking

    /// Adapters in positional order
    async fn network_adapters(&self, workload: &WorkloadRef)
        -> VmigrateResult<Vec<NetworkAdapterSnapshot>>;

    /// Distributed-switch port group lookup
    async fn find_distributed_network(&self, name: &str) -> VmigrateResult<Option<NetworkRef>>;

    /// Standard-switch network lookup
    async fn find_standard_network(&self, name: &str) -> VmigrateResult<Option<NetworkRef>>;

    async fn list_networks(&self) -> VmigrateResult<Vec<NetworkRef>>;

    async fn set_adapter_connection(
        &self,
        workload: &WorkloadRef,
        adapter: &str,
        connected: bool,
        start_connected: bool,
    ) -> VmigrateResult<()>;

    async fn assign_adapter(
        &self,
        workload: &WorkloadRef,
        adapter: &str,
        assignment: &AdapterAssignment,
    ) -> VmigrateResult<()>;
}

/// Factory trait for creating domain providers
///
/// Different transports register a factory; the run picks one by kind.
pub trait DomainProviderFactory: Send + Sync {
    fn create_provider(&self, config: &ProviderConfig)
        -> VmigrateResult<Arc<dyn DomainConnectionProvider>>;

    /// Name this factory registers under
    fn provider_kind(&self) -> &'static str;

    fn description(&self) -> &'static str;
}

/// Registry for domain provider factories
#[derive(Clone)]
pub struct DomainProviderRegistry {
    factories: HashMap<String, Arc<dyn DomainProviderFactory>>,
}

impl DomainProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory
    pub fn register(&mut self, factory: Arc<dyn DomainProviderFactory>) {
        let kind = factory.provider_kind().to_string();
        tracing::info!("Registering domain provider: {} ({})", kind, factory.description());
        self.factories.insert(kind, factory);
    }

    /// Create a provider of the configured kind
    pub fn create_provider(
        &self,
        config: &ProviderConfig,
    ) -> VmigrateResult<Arc<dyn DomainConnectionProvider>> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            VmigrateError::ConfigError(format!(
                "Unknown domain provider: '{}'. Available providers: {:?}",
                config.kind,
                self.list_available_providers()
            ))
        })?;

        factory.create_provider(config)
    }

    /// List all registered provider kinds, sorted
    pub fn list_available_providers(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// (kind, description) pairs for every registered provider
    pub fn provider_info(&self) -> Vec<(String, String)> {
        let mut info: Vec<(String, String)> = self
            .factories
            .values()
            .map(|f| (f.provider_kind().to_string(), f.description().to_string()))
            .collect();
        info.sort();
        info
    }
}

impl Default for DomainProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MemoryProviderFactory));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_registry() {
        let mut registry = DomainProviderRegistry::new();
        assert!(registry.list_available_providers().is_empty());

        registry.register(Arc::new(MemoryProviderFactory));
        assert_eq!(registry.list_available_providers(), vec!["memory"]);

        let default_registry = DomainProviderRegistry::default();
        assert!(default_registry.list_available_providers().contains(&"memory"));
    }

    #[test]
    fn test_unknown_provider_error() {
        let registry = DomainProviderRegistry::default();
        let config = ProviderConfig {
            kind: "soap".to_string(),
            inventory: None,
        };

        let err = registry.create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("Unknown domain provider"));
    }
}
