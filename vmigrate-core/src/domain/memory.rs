//! In-memory management domains
//!
//! `InMemoryFabric` is a set of independently addressable domains that can
//! relocate workloads between each other. It implements the full collaborator
//! surface, so the orchestrator runs against it unchanged. Faults and latency
//! can be injected per domain, and each domain counts connections and
//! concurrent relocations.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::inventory::{
    split_path, AdapterSpec, DatastoreSpec, HostSpec, InventorySpec, WorkloadSpec,
};
use super::{DomainConnectionProvider, DomainProviderFactory, DomainSession};
use crate::config::ProviderConfig;
use crate::error::{VmigrateError, VmigrateResult};
use crate::hierarchy::HierarchyTree;
use crate::types::{
    AdapterAssignment, ClusterRef, Credentials, DatastoreCandidate, DiskFormat, DomainEndpoint,
    EntityKind, HostCandidate, HostConnectionState, HostPowerState, InventoryNode,
    NetworkAdapterSnapshot, NetworkBacking, NetworkRef, RelocateSpec, ResourceRequirements,
    WorkloadRef,
};

const ROOT_FOLDER_NAME: &str = "vm";
const ROOT_POOL_NAME: &str = "Resources";

#[derive(Debug, Clone)]
struct NodeRecord {
    name: String,
    kind: EntityKind,
    /// `None` marks a root sentinel
    parent: Option<String>,
}

#[derive(Debug, Clone)]
struct DatacenterRecord {
    name: String,
    vm_folder: String,
}

#[derive(Debug, Clone)]
struct ClusterRecord {
    id: String,
    name: String,
    datacenter: String,
    root_pool: String,
}

#[derive(Debug, Clone)]
struct HostRecord {
    candidate: HostCandidate,
    datacenter: String,
    datastores: Vec<String>,
}

#[derive(Debug, Clone)]
struct WorkloadRecord {
    name: String,
    requirements: ResourceRequirements,
    folder: String,
    pool: String,
    host: Option<String>,
    datastore: Option<String>,
    disk_format: Option<DiskFormat>,
    adapters: Vec<NetworkAdapterSnapshot>,
}

#[derive(Debug, Default)]
struct DomainState {
    nodes: HashMap<String, NodeRecord>,
    datacenters: Vec<DatacenterRecord>,
    clusters: Vec<ClusterRecord>,
    hosts: Vec<HostRecord>,
    datastores: Vec<DatastoreCandidate>,
    networks: Vec<NetworkRef>,
    workloads: HashMap<String, WorkloadRecord>,
    next_id: u64,
}

impl DomainState {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn allocate_mac(&mut self) -> String {
        self.next_id += 1;
        let n = self.next_id;
        format!("00:50:56:{:02x}:{:02x}:{:02x}", (n >> 16) & 0xff, (n >> 8) & 0xff, n & 0xff)
    }

    fn node(&self, id: &str) -> VmigrateResult<InventoryNode> {
        let record = self
            .nodes
            .get(id)
            .ok_or_else(|| VmigrateError::not_found(format!("inventory node {}", id)))?;
        Ok(InventoryNode {
            id: id.to_string(),
            name: record.name.clone(),
            kind: record.kind,
        })
    }

    fn child_id(&self, parent_id: &str, name: &str, kind: EntityKind) -> Option<String> {
        let mut matches: Vec<&String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.kind == kind && n.name == name && n.parent.as_deref() == Some(parent_id))
            .map(|(id, _)| id)
            .collect();
        // Stable answer when duplicates were allowed in
        matches.sort();
        matches.first().map(|id| id.to_string())
    }

    fn insert_node(&mut self, parent_id: &str, name: &str, kind: EntityKind) -> String {
        let prefix = match kind {
            EntityKind::Folder => "group-v",
            EntityKind::ResourcePool => "resgroup-",
        };
        let id = self.allocate_id(prefix);
        self.nodes.insert(
            id.clone(),
            NodeRecord {
                name: name.to_string(),
                kind,
                parent: Some(parent_id.to_string()),
            },
        );
        id
    }

    fn ensure_path(&mut self, root_id: &str, segments: &[String], kind: EntityKind) -> String {
        let mut current = root_id.to_string();
        for segment in segments {
            current = match self.child_id(&current, segment, kind) {
                Some(id) => id,
                None => self.insert_node(&current, segment, kind),
            };
        }
        current
    }

    fn path_of(&self, id: &str) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = id.to_string();
        while let Some(record) = self.nodes.get(&current) {
            match &record.parent {
                Some(parent) => {
                    segments.push(record.name.clone());
                    current = parent.clone();
                }
                None => break,
            }
        }
        segments.reverse();
        segments
    }

    fn datacenter(&self, name: &str) -> VmigrateResult<&DatacenterRecord> {
        self.datacenters
            .iter()
            .find(|dc| dc.name == name)
            .ok_or_else(|| VmigrateError::not_found(format!("datacenter {}", name)))
    }

    fn cluster_by_name(&self, name: &str) -> VmigrateResult<&ClusterRecord> {
        self.clusters
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| VmigrateError::not_found(format!("cluster {}", name)))
    }

    fn host(&self, id: &str) -> VmigrateResult<&HostRecord> {
        self.hosts
            .iter()
            .find(|h| h.candidate.id == id)
            .ok_or_else(|| VmigrateError::not_found(format!("host {}", id)))
    }

    fn host_mut(&mut self, id: &str) -> Option<&mut HostRecord> {
        self.hosts.iter_mut().find(|h| h.candidate.id == id)
    }

    fn workload(&self, id: &str) -> VmigrateResult<&WorkloadRecord> {
        self.workloads
            .get(id)
            .ok_or_else(|| VmigrateError::not_found(format!("workload {}", id)))
    }

    fn workload_mut(&mut self, id: &str) -> VmigrateResult<&mut WorkloadRecord> {
        self.workloads
            .get_mut(id)
            .ok_or_else(|| VmigrateError::not_found(format!("workload {}", id)))
    }

    fn network(&self, name: &str, backing: NetworkBacking) -> Option<NetworkRef> {
        self.networks
            .iter()
            .find(|n| n.name == name && n.backing == backing)
            .cloned()
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    unreachable: bool,
    relocate_failures: HashSet<String>,
    relocate_hangs: HashSet<String>,
    failing_networks: HashSet<String>,
    adapter_read_failures: HashSet<String>,
    rename_failures: HashSet<String>,
    relocate_delay: Duration,
    allow_duplicate_children: bool,
}

#[derive(Debug, Default)]
struct DomainStats {
    connections: AtomicUsize,
    active_relocations: AtomicUsize,
    max_concurrent_relocations: AtomicUsize,
    relocation_order: Mutex<Vec<String>>,
}

/// Current state of a workload, for assertions and reporting
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadView {
    pub id: String,
    pub name: String,
    pub folder_path: Vec<String>,
    pub resource_pool_path: Vec<String>,
    pub host: Option<String>,
    pub datastore: Option<String>,
    pub disk_format: Option<DiskFormat>,
    pub adapters: Vec<NetworkAdapterSnapshot>,
}

/// One in-memory management domain
#[derive(Debug)]
pub struct InMemoryDomain {
    address: String,
    required_credentials: RwLock<Option<Credentials>>,
    state: RwLock<DomainState>,
    faults: RwLock<FaultPlan>,
    stats: DomainStats,
}

impl InMemoryDomain {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            required_credentials: RwLock::new(None),
            state: RwLock::new(DomainState::default()),
            faults: RwLock::new(FaultPlan::default()),
            stats: DomainStats::default(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    // Inventory construction

    pub fn require_credentials(&self, credentials: Credentials) {
        *self.required_credentials.write() = Some(credentials);
    }

    pub fn add_datacenter(&self, name: &str) {
        let mut state = self.state.write();
        if state.datacenters.iter().any(|dc| dc.name == name) {
            return;
        }
        let vm_folder = state.allocate_id("group-v");
        state.nodes.insert(
            vm_folder.clone(),
            NodeRecord {
                name: ROOT_FOLDER_NAME.to_string(),
                kind: EntityKind::Folder,
                parent: None,
            },
        );
        state.datacenters.push(DatacenterRecord {
            name: name.to_string(),
            vm_folder,
        });
    }

    /// Pre-create a folder path below the datacenter's VM root folder
    pub fn add_folder_path(&self, datacenter: &str, path: &str) -> VmigrateResult<()> {
        let mut state = self.state.write();
        let root = state.datacenter(datacenter)?.vm_folder.clone();
        state.ensure_path(&root, &split_path(path), EntityKind::Folder);
        Ok(())
    }

    pub fn add_cluster(&self, datacenter: &str, name: &str) -> VmigrateResult<ClusterRef> {
        let mut state = self.state.write();
        state.datacenter(datacenter)?;
        if let Ok(existing) = state.cluster_by_name(name) {
            return Ok(ClusterRef {
                id: existing.id.clone(),
                name: existing.name.clone(),
            });
        }
        let id = state.allocate_id("domain-c");
        let root_pool = state.allocate_id("resgroup-");
        state.nodes.insert(
            root_pool.clone(),
            NodeRecord {
                name: ROOT_POOL_NAME.to_string(),
                kind: EntityKind::ResourcePool,
                parent: None,
            },
        );
        state.clusters.push(ClusterRecord {
            id: id.clone(),
            name: name.to_string(),
            datacenter: datacenter.to_string(),
            root_pool,
        });
        Ok(ClusterRef {
            id,
            name: name.to_string(),
        })
    }

    /// Pre-create a resource pool path below the cluster's root pool
    pub fn add_resource_pool_path(&self, cluster: &str, path: &str) -> VmigrateResult<()> {
        let mut state = self.state.write();
        let root = state.cluster_by_name(cluster)?.root_pool.clone();
        state.ensure_path(&root, &split_path(path), EntityKind::ResourcePool);
        Ok(())
    }

    pub fn add_datastore(&self, spec: &DatastoreSpec) -> String {
        let mut state = self.state.write();
        let id = state.allocate_id("datastore");
        state.datastores.push(DatastoreCandidate {
            id: id.clone(),
            name: spec.name.clone(),
            capacity_gb: spec.capacity_gb,
            free_space_gb: spec.free_space_gb,
            accessible: spec.accessible,
        });
        id
    }

    pub fn add_network(&self, name: &str, backing: NetworkBacking) -> String {
        let mut state = self.state.write();
        let prefix = match backing {
            NetworkBacking::Distributed => "dvportgroup",
            NetworkBacking::Standard => "network",
        };
        let id = state.allocate_id(prefix);
        state.networks.push(NetworkRef {
            id: id.clone(),
            name: name.to_string(),
            backing,
        });
        id
    }

    pub fn add_host(&self, cluster: &str, spec: &HostSpec) -> VmigrateResult<String> {
        let mut state = self.state.write();
        let (cluster_name, datacenter) = {
            let record = state.cluster_by_name(cluster)?;
            (record.name.clone(), record.datacenter.clone())
        };
        let mut datastores = Vec::with_capacity(spec.datastores.len());
        for name in &spec.datastores {
            let ds = state
                .datastores
                .iter()
                .find(|ds| &ds.name == name)
                .ok_or_else(|| VmigrateError::not_found(format!("datastore {}", name)))?;
            datastores.push(ds.id.clone());
        }
        let id = state.allocate_id("host");
        state.hosts.push(HostRecord {
            candidate: HostCandidate {
                id: id.clone(),
                name: spec.name.clone(),
                cluster: cluster_name,
                connection_state: if spec.connected {
                    HostConnectionState::Connected
                } else {
                    HostConnectionState::Disconnected
                },
                power_state: if spec.powered_on {
                    HostPowerState::PoweredOn
                } else {
                    HostPowerState::PoweredOff
                },
                cpu_cores: spec.cpu_cores,
                cpu_capacity_mhz: spec.cpu_capacity_mhz,
                cpu_usage_mhz: spec.cpu_usage_mhz,
                memory_capacity_mb: spec.memory_capacity_mb,
                memory_usage_mb: spec.memory_usage_mb,
            },
            datacenter,
            datastores,
        });
        Ok(id)
    }

    pub fn add_workload(&self, spec: &WorkloadSpec) -> VmigrateResult<WorkloadRef> {
        let mut state = self.state.write();
        let (datacenter, root_pool) = {
            let cluster = state.cluster_by_name(&spec.cluster)?;
            (cluster.datacenter.clone(), cluster.root_pool.clone())
        };
        let root_folder = state.datacenter(&datacenter)?.vm_folder.clone();
        let folder = state.ensure_path(&root_folder, &split_path(&spec.folder), EntityKind::Folder);
        let pool = state.ensure_path(
            &root_pool,
            &split_path(&spec.resource_pool),
            EntityKind::ResourcePool,
        );

        let mut adapters = Vec::with_capacity(spec.adapters.len());
        for (index, adapter) in spec.adapters.iter().enumerate() {
            adapters.push(Self::adapter_from_spec(&mut state, index, adapter));
        }

        let id = state.allocate_id("vm");
        state.workloads.insert(
            id.clone(),
            WorkloadRecord {
                name: spec.name.clone(),
                requirements: ResourceRequirements {
                    cpu_count: spec.cpu_count,
                    memory_mb: spec.memory_mb,
                    used_space_gb: spec.used_space_gb,
                },
                folder,
                pool,
                host: None,
                datastore: None,
                disk_format: None,
                adapters,
            },
        );
        Ok(WorkloadRef {
            name: spec.name.clone(),
            id,
        })
    }

    fn adapter_from_spec(
        state: &mut DomainState,
        index: usize,
        spec: &AdapterSpec,
    ) -> NetworkAdapterSnapshot {
        let distributed = state
            .network(&spec.network, NetworkBacking::Distributed)
            .is_some();
        let mac_address = match &spec.mac {
            Some(mac) => mac.clone(),
            None => state.allocate_mac(),
        };
        NetworkAdapterSnapshot {
            name: spec
                .name
                .clone()
                .unwrap_or_else(|| format!("Network adapter {}", index + 1)),
            network_name: spec.network.clone(),
            mac_address,
            connected: spec.connected,
            start_connected: spec.start_connected,
            distributed,
        }
    }

    // Fault injection

    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.write().unreachable = unreachable;
    }

    pub fn fail_relocate(&self, workload: &str) {
        self.faults.write().relocate_failures.insert(workload.to_string());
    }

    /// Relocation of `workload` never completes
    pub fn hang_relocate(&self, workload: &str) {
        self.faults.write().relocate_hangs.insert(workload.to_string());
    }

    /// Assigning any adapter to `network` fails
    pub fn fail_network(&self, network: &str) {
        self.faults.write().failing_networks.insert(network.to_string());
    }

    /// Reading the adapters of `workload` fails
    pub fn fail_adapter_read(&self, workload: &str) {
        self.faults.write().adapter_read_failures.insert(workload.to_string());
    }

    pub fn fail_rename(&self, workload: &str) {
        self.faults.write().rename_failures.insert(workload.to_string());
    }

    pub fn set_relocate_delay(&self, delay: Duration) {
        self.faults.write().relocate_delay = delay;
    }

    /// Let `create_child` add a sibling with an existing name
    pub fn allow_duplicate_children(&self, allow: bool) {
        self.faults.write().allow_duplicate_children = allow;
    }

    // Inspection

    pub fn connection_count(&self) -> usize {
        self.stats.connections.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_relocations(&self) -> usize {
        self.stats.max_concurrent_relocations.load(Ordering::SeqCst)
    }

    /// Names of workloads in the order their relocation finished
    pub fn relocation_order(&self) -> Vec<String> {
        self.stats.relocation_order.lock().clone()
    }

    pub fn workload(&self, name: &str) -> Option<WorkloadView> {
        let state = self.state.read();
        let (id, record) = state.workloads.iter().find(|(_, w)| w.name == name)?;
        Some(WorkloadView {
            id: id.clone(),
            name: record.name.clone(),
            folder_path: state.path_of(&record.folder),
            resource_pool_path: state.path_of(&record.pool),
            host: record
                .host
                .as_ref()
                .and_then(|h| state.host(h).ok())
                .map(|h| h.candidate.name.clone()),
            datastore: record.datastore.as_ref().and_then(|d| {
                state
                    .datastores
                    .iter()
                    .find(|ds| &ds.id == d)
                    .map(|ds| ds.name.clone())
            }),
            disk_format: record.disk_format,
            adapters: record.adapters.clone(),
        })
    }

    pub fn workload_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .read()
            .workloads
            .values()
            .map(|w| w.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of inventory nodes of `kind` named `name`, anywhere in the domain
    pub fn count_nodes(&self, kind: EntityKind, name: &str) -> usize {
        self.state
            .read()
            .nodes
            .values()
            .filter(|n| n.kind == kind && n.name == name)
            .count()
    }

    pub fn host_snapshot(&self, name: &str) -> Option<HostCandidate> {
        self.state
            .read()
            .hosts
            .iter()
            .find(|h| h.candidate.name == name)
            .map(|h| h.candidate.clone())
    }

    pub fn datastore_snapshot(&self, name: &str) -> Option<DatastoreCandidate> {
        self.state
            .read()
            .datastores
            .iter()
            .find(|ds| ds.name == name)
            .cloned()
    }

    fn begin_relocation(self: &Arc<Self>) -> RelocationGuard {
        let active = self.stats.active_relocations.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats
            .max_concurrent_relocations
            .fetch_max(active, Ordering::SeqCst);
        RelocationGuard {
            domain: self.clone(),
        }
    }

    /// Land a workload arriving from another domain
    fn receive_workload(
        &self,
        mut record: WorkloadRecord,
        spec: &RelocateSpec,
    ) -> VmigrateResult<WorkloadRef> {
        let mut state = self.state.write();

        let (datacenter, cluster_name) = {
            let host = state.host(&spec.host_id)?;
            (host.datacenter.clone(), host.candidate.cluster.clone())
        };
        let root_folder = state.datacenter(&datacenter)?.vm_folder.clone();
        let root_pool = state.cluster_by_name(&cluster_name)?.root_pool.clone();

        let required = record.requirements.used_space_gb;
        {
            let datastore = state
                .datastores
                .iter_mut()
                .find(|ds| ds.id == spec.datastore_id)
                .ok_or_else(|| VmigrateError::not_found(format!("datastore {}", spec.datastore_id)))?;
            if datastore.free_space_gb < required {
                return Err(VmigrateError::execution(
                    "relocate",
                    format!(
                        "datastore {} has {:.1} GB free, {:.1} GB required",
                        datastore.name, datastore.free_space_gb, required
                    ),
                ));
            }
            datastore.free_space_gb -= required;
        }
        if let Some(host) = state.host_mut(&spec.host_id) {
            host.candidate.memory_usage_mb += record.requirements.memory_mb;
        }

        for adapter in record.adapters.iter_mut() {
            adapter.mac_address = state.allocate_mac();
        }

        record.folder = root_folder;
        record.pool = root_pool;
        record.host = Some(spec.host_id.clone());
        record.datastore = Some(spec.datastore_id.clone());
        record.disk_format = Some(spec.disk_format);

        let id = state.allocate_id("vm");
        let name = record.name.clone();
        state.workloads.insert(id.clone(), record);
        Ok(WorkloadRef { name, id })
    }
}

struct RelocationGuard {
    domain: Arc<InMemoryDomain>,
}

impl Drop for RelocationGuard {
    fn drop(&mut self) {
        self.domain
            .stats
            .active_relocations
            .fetch_sub(1, Ordering::SeqCst);
    }
}

/// A set of in-memory domains reachable by address
#[derive(Debug, Clone, Default)]
pub struct InMemoryFabric {
    domains: Arc<DashMap<String, Arc<InMemoryDomain>>>,
}

impl InMemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or return the existing) domain at `address`
    pub fn add_domain(&self, address: &str) -> Arc<InMemoryDomain> {
        self.domains
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(InMemoryDomain::new(address)))
            .value()
            .clone()
    }

    pub fn domain(&self, address: &str) -> Option<Arc<InMemoryDomain>> {
        self.domains.get(address).map(|d| d.value().clone())
    }

    /// Build a fabric from a declarative inventory
    pub fn from_spec(spec: &InventorySpec) -> VmigrateResult<Self> {
        let fabric = Self::new();
        for domain_spec in &spec.domains {
            let domain = fabric.add_domain(&domain_spec.address);
            if let Some(username) = &domain_spec.username {
                domain.require_credentials(Credentials::new(
                    username.clone(),
                    domain_spec.password.clone().unwrap_or_default(),
                ));
            }
            for dc in &domain_spec.datacenters {
                domain.add_datacenter(&dc.name);
                for folder in &dc.folders {
                    domain.add_folder_path(&dc.name, folder)?;
                }
                for ds in &dc.datastores {
                    domain.add_datastore(ds);
                }
                for network in &dc.networks {
                    let backing = if network.distributed {
                        NetworkBacking::Distributed
                    } else {
                        NetworkBacking::Standard
                    };
                    domain.add_network(&network.name, backing);
                }
                for cluster in &dc.clusters {
                    domain.add_cluster(&dc.name, &cluster.name)?;
                    for pool in &cluster.resource_pools {
                        domain.add_resource_pool_path(&cluster.name, pool)?;
                    }
                    for host in &cluster.hosts {
                        domain.add_host(&cluster.name, host)?;
                    }
                }
                for workload in &dc.workloads {
                    domain.add_workload(workload)?;
                }
            }
            tracing::debug!("Loaded in-memory domain '{}'", domain_spec.address);
        }
        Ok(fabric)
    }
}

#[async_trait]
impl DomainConnectionProvider for InMemoryFabric {
    async fn connect(
        &self,
        endpoint: &DomainEndpoint,
        credentials: &Credentials,
    ) -> VmigrateResult<Arc<dyn DomainSession>> {
        let domain = self.domain(&endpoint.address).ok_or_else(|| {
            VmigrateError::connection(&endpoint.address, "no such domain")
        })?;

        if domain.faults.read().unreachable {
            return Err(VmigrateError::connection(&endpoint.address, "domain unreachable"));
        }

        if let Some(required) = domain.required_credentials.read().as_ref() {
            if required != credentials {
                return Err(VmigrateError::connection(
                    &endpoint.address,
                    format!("authentication failed for user '{}'", credentials.username),
                ));
            }
        }

        domain.stats.connections.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Mock: opened session to '{}'", endpoint.address);

        Ok(Arc::new(InMemorySession {
            domain,
            fabric: self.clone(),
        }))
    }
}

/// Session against one in-memory domain
pub struct InMemorySession {
    domain: Arc<InMemoryDomain>,
    fabric: InMemoryFabric,
}

impl InMemorySession {
    fn state(&self) -> parking_lot::RwLockReadGuard<'_, DomainState> {
        self.domain.state.read()
    }

    fn state_mut(&self) -> parking_lot::RwLockWriteGuard<'_, DomainState> {
        self.domain.state.write()
    }
}

#[async_trait]
impl HierarchyTree for InMemorySession {
    async fn parent(&self, node: &InventoryNode) -> VmigrateResult<Option<InventoryNode>> {
        let state = self.state();
        let record = state
            .nodes
            .get(&node.id)
            .ok_or_else(|| VmigrateError::not_found(format!("{} {}", node.kind, node.id)))?;
        match &record.parent {
            Some(parent) => Ok(Some(state.node(parent)?)),
            None => Ok(None),
        }
    }

    async fn child(
        &self,
        parent: &InventoryNode,
        name: &str,
    ) -> VmigrateResult<Option<InventoryNode>> {
        let state = self.state();
        match state.child_id(&parent.id, name, parent.kind) {
            Some(id) => Ok(Some(state.node(&id)?)),
            None => Ok(None),
        }
    }

    async fn create_child(
        &self,
        parent: &InventoryNode,
        name: &str,
    ) -> VmigrateResult<InventoryNode> {
        // Remote creates are not instantaneous; give other tasks a turn
        tokio::task::yield_now().await;

        let allow_duplicates = self.domain.faults.read().allow_duplicate_children;
        let mut state = self.state_mut();
        if !state.nodes.contains_key(&parent.id) {
            return Err(VmigrateError::not_found(format!("{} {}", parent.kind, parent.id)));
        }
        if !allow_duplicates && state.child_id(&parent.id, name, parent.kind).is_some() {
            return Err(VmigrateError::AlreadyExists {
                resource: format!("{} '{}' under '{}'", parent.kind, name, parent.name),
            });
        }
        let id = state.insert_node(&parent.id, name, parent.kind);
        Ok(InventoryNode {
            id,
            name: name.to_string(),
            kind: parent.kind,
        })
    }
}

#[async_trait]
impl DomainSession for InMemorySession {
    fn address(&self) -> &str {
        self.domain.address()
    }

    async fn find_workload(&self, name: &str) -> VmigrateResult<Option<WorkloadRef>> {
        let state = self.state();
        Ok(state
            .workloads
            .iter()
            .find(|(_, w)| w.name == name)
            .map(|(id, w)| WorkloadRef {
                name: w.name.clone(),
                id: id.clone(),
            }))
    }

    async fn workload_requirements(
        &self,
        workload: &WorkloadRef,
    ) -> VmigrateResult<ResourceRequirements> {
        Ok(self.state().workload(&workload.id)?.requirements.clone())
    }

    async fn workload_folder(&self, workload: &WorkloadRef) -> VmigrateResult<InventoryNode> {
        let state = self.state();
        let folder = state.workload(&workload.id)?.folder.clone();
        state.node(&folder)
    }

    async fn workload_resource_pool(
        &self,
        workload: &WorkloadRef,
    ) -> VmigrateResult<InventoryNode> {
        let state = self.state();
        let pool = state.workload(&workload.id)?.pool.clone();
        state.node(&pool)
    }

    async fn find_cluster(&self, name: &str) -> VmigrateResult<Option<ClusterRef>> {
        Ok(self.state().cluster_by_name(name).ok().map(|c| ClusterRef {
            id: c.id.clone(),
            name: c.name.clone(),
        }))
    }

    async fn list_hosts(&self, cluster: Option<&ClusterRef>) -> VmigrateResult<Vec<HostCandidate>> {
        let state = self.state();
        Ok(state
            .hosts
            .iter()
            .filter(|h| cluster.map_or(true, |c| h.candidate.cluster == c.name))
            .map(|h| h.candidate.clone())
            .collect())
    }

    async fn host_datastores(&self, host_id: &str) -> VmigrateResult<Vec<DatastoreCandidate>> {
        let state = self.state();
        let host = state.host(host_id)?;
        Ok(state
            .datastores
            .iter()
            .filter(|ds| host.datastores.contains(&ds.id))
            .cloned()
            .collect())
    }

    async fn find_datastore(&self, name: &str) -> VmigrateResult<Option<DatastoreCandidate>> {
        Ok(self
            .state()
            .datastores
            .iter()
            .find(|ds| ds.name == name)
            .cloned())
    }

    async fn root_folder(&self, host_id: &str) -> VmigrateResult<InventoryNode> {
        let state = self.state();
        let datacenter = state.host(host_id)?.datacenter.clone();
        let folder = state.datacenter(&datacenter)?.vm_folder.clone();
        state.node(&folder)
    }

    async fn root_resource_pool(&self, host_id: &str) -> VmigrateResult<InventoryNode> {
        let state = self.state();
        let cluster = state.host(host_id)?.candidate.cluster.clone();
        let pool = state.cluster_by_name(&cluster)?.root_pool.clone();
        state.node(&pool)
    }

    async fn relocate(
        &self,
        workload: &WorkloadRef,
        spec: &RelocateSpec,
    ) -> VmigrateResult<WorkloadRef> {
        let target = self.fabric.domain(&spec.target_address).ok_or_else(|| {
            VmigrateError::connection(&spec.target_address, "no such domain")
        })?;
        if target.faults.read().unreachable {
            return Err(VmigrateError::connection(&spec.target_address, "domain unreachable"));
        }
        self.state().workload(&workload.id)?;

        let _relocation = self.domain.begin_relocation();
        let (delay, fails, hangs) = {
            let faults = self.domain.faults.read();
            (
                faults.relocate_delay,
                faults.relocate_failures.contains(&workload.name),
                faults.relocate_hangs.contains(&workload.name),
            )
        };

        tracing::info!(
            "Mock: relocating '{}' to {} (host {}, datastore {}, {})",
            workload.name,
            spec.target_address,
            spec.host_id,
            spec.datastore_id,
            spec.disk_format
        );

        if hangs {
            futures::future::pending::<()>().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(VmigrateError::execution(
                "relocate",
                format!("task for '{}' failed on the source domain", workload.name),
            ));
        }

        let record = self
            .state_mut()
            .workloads
            .remove(&workload.id)
            .ok_or_else(|| VmigrateError::not_found(format!("workload {}", workload.id)))?;

        match target.receive_workload(record.clone(), spec) {
            Ok(moved) => {
                self.domain
                    .stats
                    .relocation_order
                    .lock()
                    .push(workload.name.clone());
                Ok(moved)
            }
            Err(e) => {
                self.state_mut().workloads.insert(workload.id.clone(), record);
                Err(e)
            }
        }
    }

    async fn move_to_folder(
        &self,
        workload: &WorkloadRef,
        folder: &InventoryNode,
    ) -> VmigrateResult<()> {
        let mut state = self.state_mut();
        match state.nodes.get(&folder.id) {
            Some(node) if node.kind == EntityKind::Folder => {}
            _ => return Err(VmigrateError::not_found(format!("folder {}", folder.id))),
        }
        state.workload_mut(&workload.id)?.folder = folder.id.clone();
        Ok(())
    }

    async fn move_to_resource_pool(
        &self,
        workload: &WorkloadRef,
        pool: &InventoryNode,
    ) -> VmigrateResult<()> {
        let mut state = self.state_mut();
        match state.nodes.get(&pool.id) {
            Some(node) if node.kind == EntityKind::ResourcePool => {}
            _ => return Err(VmigrateError::not_found(format!("resource pool {}", pool.id))),
        }
        state.workload_mut(&workload.id)?.pool = pool.id.clone();
        Ok(())
    }

    async fn rename_workload(&self, workload: &WorkloadRef, new_name: &str) -> VmigrateResult<()> {
        if self.domain.faults.read().rename_failures.contains(&workload.name) {
            return Err(VmigrateError::execution(
                "rename",
                format!("rename of '{}' rejected", workload.name),
            ));
        }
        self.state_mut().workload_mut(&workload.id)?.name = new_name.to_string();
        Ok(())
    }

    async fn network_adapters(
        &self,
        workload: &WorkloadRef,
    ) -> VmigrateResult<Vec<NetworkAdapterSnapshot>> {
        if self
            .domain
            .faults
            .read()
            .adapter_read_failures
            .contains(&workload.name)
        {
            return Err(VmigrateError::execution(
                "read network adapters",
                format!("adapter query for '{}' rejected", workload.name),
            ));
        }
        Ok(self.state().workload(&workload.id)?.adapters.clone())
    }

    async fn find_distributed_network(&self, name: &str) -> VmigrateResult<Option<NetworkRef>> {
        Ok(self.state().network(name, NetworkBacking::Distributed))
    }

    async fn find_standard_network(&self, name: &str) -> VmigrateResult<Option<NetworkRef>> {
        Ok(self.state().network(name, NetworkBacking::Standard))
    }

    async fn list_networks(&self) -> VmigrateResult<Vec<NetworkRef>> {
        Ok(self.state().networks.clone())
    }

    async fn set_adapter_connection(
        &self,
        workload: &WorkloadRef,
        adapter: &str,
        connected: bool,
        start_connected: bool,
    ) -> VmigrateResult<()> {
        let mut state = self.state_mut();
        let record = state.workload_mut(&workload.id)?;
        let nic = record
            .adapters
            .iter_mut()
            .find(|a| a.name == adapter)
            .ok_or_else(|| VmigrateError::network(adapter, "adapter not found"))?;
        nic.connected = connected;
        nic.start_connected = start_connected;
        Ok(())
    }

    async fn assign_adapter(
        &self,
        workload: &WorkloadRef,
        adapter: &str,
        assignment: &AdapterAssignment,
    ) -> VmigrateResult<()> {
        if self
            .domain
            .faults
            .read()
            .failing_networks
            .contains(&assignment.network.name)
        {
            return Err(VmigrateError::network(
                adapter,
                format!("reconfiguration onto '{}' rejected", assignment.network.name),
            ));
        }

        let mut state = self.state_mut();
        if !state.networks.iter().any(|n| n.id == assignment.network.id) {
            return Err(VmigrateError::network(
                adapter,
                format!("network '{}' does not exist", assignment.network.name),
            ));
        }
        let record = state.workload_mut(&workload.id)?;
        let nic = record
            .adapters
            .iter_mut()
            .find(|a| a.name == adapter)
            .ok_or_else(|| VmigrateError::network(adapter, "adapter not found"))?;
        nic.network_name = assignment.network.name.clone();
        nic.distributed = assignment.network.backing == NetworkBacking::Distributed;
        nic.connected = assignment.connected;
        nic.start_connected = assignment.start_connected;
        if let Some(mac) = &assignment.mac_address {
            nic.mac_address = mac.clone();
        }
        Ok(())
    }
}

/// Factory for the in-memory provider (built-in)
pub struct MemoryProviderFactory;

impl DomainProviderFactory for MemoryProviderFactory {
    fn create_provider(
        &self,
        config: &ProviderConfig,
    ) -> VmigrateResult<Arc<dyn DomainConnectionProvider>> {
        let fabric = match &config.inventory {
            Some(path) => InMemoryFabric::from_spec(&InventorySpec::from_file(path)?)?,
            None => {
                tracing::warn!("In-memory provider started without an inventory; no domains exist");
                InMemoryFabric::new()
            }
        };
        Ok(Arc::new(fabric))
    }

    fn provider_kind(&self) -> &'static str {
        "memory"
    }

    fn description(&self) -> &'static str {
        "In-memory domains loaded from an inventory file (dry runs and tests)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fabric() -> (InMemoryFabric, Arc<InMemoryDomain>, Arc<InMemoryDomain>) {
        let fabric = InMemoryFabric::new();
        let src = fabric.add_domain("src");
        src.add_datacenter("DC1");
        src.add_cluster("DC1", "C1").unwrap();
        src.add_network("VM Network", NetworkBacking::Standard);
        src.add_workload(
            &WorkloadSpec::new("web01", "C1")
                .folder("Prod/Web")
                .resource_pool("Gold")
                .adapter("VM Network"),
        )
        .unwrap();

        let dst = fabric.add_domain("dst");
        dst.add_datacenter("DC2");
        dst.add_cluster("DC2", "C2").unwrap();
        dst.add_datastore(&DatastoreSpec::new("ds1", 1000.0, 500.0));
        dst.add_host("C2", &HostSpec::new("esx1", 16, 65_536).mount("ds1"))
            .unwrap();
        (fabric, src, dst)
    }

    fn creds() -> Credentials {
        Credentials::new("admin", "pw")
    }

    #[tokio::test]
    async fn test_connect_checks_reachability_and_credentials() {
        let (fabric, src, _) = fabric();
        src.require_credentials(creds());

        assert!(fabric
            .connect(&DomainEndpoint::new("src"), &Credentials::new("admin", "bad"))
            .await
            .is_err());
        assert!(fabric.connect(&DomainEndpoint::new("src"), &creds()).await.is_ok());
        assert!(fabric.connect(&DomainEndpoint::new("nowhere"), &creds()).await.is_err());

        src.set_unreachable(true);
        let err = fabric
            .connect(&DomainEndpoint::new("src"), &creds())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VmigrateError::Connection { .. }));
        assert_eq!(src.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_relocate_moves_workload_between_domains() {
        let (fabric, src, dst) = fabric();
        let session = fabric.connect(&DomainEndpoint::new("src"), &creds()).await.unwrap();
        let workload = session.find_workload("web01").await.unwrap().unwrap();
        let before = session.network_adapters(&workload).await.unwrap();

        let host = dst.host_snapshot("esx1").unwrap();
        let ds = dst.datastore_snapshot("ds1").unwrap();
        let moved = session
            .relocate(
                &workload,
                &RelocateSpec {
                    target_address: "dst".into(),
                    host_id: host.id.clone(),
                    datastore_id: ds.id.clone(),
                    disk_format: DiskFormat::Thin,
                },
            )
            .await
            .unwrap();

        assert_eq!(moved.name, "web01");
        assert!(src.workload("web01").is_none());
        let view = dst.workload("web01").unwrap();
        assert!(view.folder_path.is_empty());
        assert_eq!(view.host.as_deref(), Some("esx1"));
        assert_eq!(view.disk_format, Some(DiskFormat::Thin));
        assert_eq!(view.adapters[0].network_name, "VM Network");
        assert_ne!(view.adapters[0].mac_address, before[0].mac_address);
        assert_eq!(dst.datastore_snapshot("ds1").unwrap().free_space_gb, 460.0);
        assert_eq!(src.relocation_order(), vec!["web01"]);
    }

    #[tokio::test]
    async fn test_source_hierarchy_walk() {
        let (fabric, _, _) = fabric();
        let session = fabric.connect(&DomainEndpoint::new("src"), &creds()).await.unwrap();
        let workload = session.find_workload("web01").await.unwrap().unwrap();

        let folder = session.workload_folder(&workload).await.unwrap();
        assert_eq!(folder.name, "Web");
        let parent = session.parent(&folder).await.unwrap().unwrap();
        assert_eq!(parent.name, "Prod");
        let root = session.parent(&parent).await.unwrap().unwrap();
        assert_eq!(root.name, "vm");
        assert!(session.parent(&root).await.unwrap().is_none());

        let pool = session.workload_resource_pool(&workload).await.unwrap();
        assert_eq!(pool.kind, EntityKind::ResourcePool);
        assert_eq!(pool.name, "Gold");
    }

    #[tokio::test]
    async fn test_duplicate_children_rejected_by_default() {
        let (fabric, src, _) = fabric();
        let session = fabric.connect(&DomainEndpoint::new("src"), &creds()).await.unwrap();
        let workload = session.find_workload("web01").await.unwrap().unwrap();
        let web = session.workload_folder(&workload).await.unwrap();
        let prod = session.parent(&web).await.unwrap().unwrap();

        let err = session.create_child(&prod, "Web").await.unwrap_err();
        assert!(matches!(err, VmigrateError::AlreadyExists { .. }));

        src.allow_duplicate_children(true);
        session.create_child(&prod, "Web").await.unwrap();
        assert_eq!(src.count_nodes(EntityKind::Folder, "Web"), 2);
    }
}
