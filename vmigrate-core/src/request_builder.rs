//! Pre-scheduling resolution of each workload into a self-contained request
//!
//! Everything a job needs to know about its destination is decided here,
//! sequentially and before any job starts: the host, the datastore, and the
//! folder and resource-pool paths to recreate. Workloads that cannot be
//! placed are turned into failed results and never reach the scheduler.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::DomainSession;
use crate::error::{VmigrateError, VmigrateResult};
use crate::executor::MigrationPhase;
use crate::hierarchy::{display_path, resolve_source_path};
use crate::placement::PlacementResolver;
use crate::plan::MigrationOptions;
use crate::results::MigrationResult;
use crate::types::{
    ClusterRef, DatastoreCandidate, HostCandidate, NetworkMapping, ResourceRequirements,
    WorkloadRef,
};

/// Resolved destination for one workload; fixed once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationPlacement {
    pub host_id: String,
    pub host_name: String,
    pub datastore_id: String,
    pub datastore_name: String,
    /// Folder path below the destination VM root, outermost first
    pub folder_segments: Vec<String>,
    /// Resource-pool path below the destination cluster root pool
    pub resource_pool_segments: Vec<String>,
}

/// One unit of schedulable work
#[derive(Debug, Clone)]
pub struct MigrationRequest {
    /// Submission order, starting at 0
    pub sequence: usize,
    pub workload: WorkloadRef,
    pub requirements: ResourceRequirements,
    pub placement: DestinationPlacement,
    pub network_mapping: Arc<NetworkMapping>,
    pub options: Arc<MigrationOptions>,
}

/// Destination overrides resolved during setup
#[derive(Debug, Clone, Default)]
pub struct DestinationScope {
    pub cluster: Option<ClusterRef>,
    pub datastore: Option<DatastoreCandidate>,
}

/// Requests ready for scheduling plus the workloads that were rejected
#[derive(Debug, Default)]
pub struct BuildOutput {
    pub requests: Vec<MigrationRequest>,
    pub rejected: Vec<MigrationResult>,
}

/// Capacity already promised to earlier workloads of this run
#[derive(Debug, Default)]
struct CapacityProjection {
    host_cpu_mhz: HashMap<String, u64>,
    host_memory_mb: HashMap<String, u64>,
    datastore_gb: HashMap<String, f64>,
}

impl CapacityProjection {
    fn apply_to_hosts(&self, hosts: &mut [HostCandidate]) {
        for host in hosts {
            host.cpu_usage_mhz += self.host_cpu_mhz.get(&host.id).copied().unwrap_or(0);
            host.memory_usage_mb += self.host_memory_mb.get(&host.id).copied().unwrap_or(0);
        }
    }

    fn apply_to_datastores(&self, datastores: &mut [DatastoreCandidate]) {
        for ds in datastores {
            ds.free_space_gb -= self.datastore_gb.get(&ds.id).copied().unwrap_or(0.0);
        }
    }

    fn claim(&mut self, host: &HostCandidate, datastore_id: &str, req: &ResourceRequirements) {
        let mhz_per_core = if host.cpu_cores == 0 {
            0
        } else {
            host.cpu_capacity_mhz / host.cpu_cores as u64
        };
        *self.host_cpu_mhz.entry(host.id.clone()).or_default() += mhz_per_core * req.cpu_count as u64;
        *self.host_memory_mb.entry(host.id.clone()).or_default() += req.memory_mb;
        *self.datastore_gb.entry(datastore_id.to_string()).or_default() += req.used_space_gb;
    }
}

pub struct MigrationRequestBuilder {
    source: Arc<dyn DomainSession>,
    target: Arc<dyn DomainSession>,
    resolver: PlacementResolver,
    scope: DestinationScope,
    network_mapping: Arc<NetworkMapping>,
    options: Arc<MigrationOptions>,
}

impl MigrationRequestBuilder {
    pub fn new(
        source: Arc<dyn DomainSession>,
        target: Arc<dyn DomainSession>,
        resolver: PlacementResolver,
        scope: DestinationScope,
        network_mapping: NetworkMapping,
        options: MigrationOptions,
    ) -> Self {
        Self {
            source,
            target,
            resolver,
            scope,
            network_mapping: Arc::new(network_mapping),
            options: Arc::new(options),
        }
    }

    /// Build requests for `workloads` in order
    ///
    /// Sequence numbers follow the input order, including for rejected
    /// workloads, so the queue keeps submission order.
    pub async fn build_all(&self, workloads: &[WorkloadRef]) -> BuildOutput {
        let mut output = BuildOutput::default();
        let mut projection = CapacityProjection::default();

        for (sequence, workload) in workloads.iter().enumerate() {
            let started_at = Utc::now();
            match self.build_one(sequence, workload, &mut projection).await {
                Ok(request) => {
                    info!(
                        workload = %workload.name,
                        host = %request.placement.host_name,
                        datastore = %request.placement.datastore_name,
                        folder = %display_path(&request.placement.folder_segments),
                        "Planned migration"
                    );
                    output.requests.push(request);
                }
                Err(e) => {
                    output.rejected.push(MigrationResult::failed(
                        &workload.name,
                        MigrationPhase::Planning,
                        &e,
                        started_at,
                    ));
                }
            }
        }

        debug!(
            planned = output.requests.len(),
            rejected = output.rejected.len(),
            "Request building finished"
        );
        output
    }

    async fn build_one(
        &self,
        sequence: usize,
        workload: &WorkloadRef,
        projection: &mut CapacityProjection,
    ) -> VmigrateResult<MigrationRequest> {
        let requirements = self.source.workload_requirements(workload).await?;

        let mut hosts = self.target.list_hosts(self.scope.cluster.as_ref()).await?;
        if let Some(datastore) = &self.scope.datastore {
            hosts = self.hosts_mounting(hosts, &datastore.id).await?;
        }
        projection.apply_to_hosts(&mut hosts);

        let host_choice = self.resolver.select_host(
            &workload.name,
            &hosts,
            requirements.cpu_count,
            requirements.memory_mb,
        )?;
        let host = hosts
            .iter()
            .find(|h| h.id == host_choice.id)
            .cloned()
            .ok_or_else(|| VmigrateError::Internal {
                message: format!("selected host {} vanished from candidates", host_choice.id),
            })?;

        let mut datastores = match &self.scope.datastore {
            Some(datastore) => vec![datastore.clone()],
            None => self.target.host_datastores(&host.id).await?,
        };
        projection.apply_to_datastores(&mut datastores);
        let datastore_choice =
            self.resolver
                .select_datastore(&workload.name, &datastores, requirements.used_space_gb)?;

        let folder = self.source.workload_folder(workload).await?;
        let folder_segments = resolve_source_path(self.source.as_ref(), &folder).await?;
        let pool = self.source.workload_resource_pool(workload).await?;
        let resource_pool_segments = resolve_source_path(self.source.as_ref(), &pool).await?;

        // Both destination roots must exist before the workload is queued
        self.target.root_folder(&host.id).await.map_err(|e| {
            VmigrateError::hierarchy("<root folder>", format!("host {}: {}", host.name, e))
        })?;
        self.target.root_resource_pool(&host.id).await.map_err(|e| {
            VmigrateError::hierarchy("<root resource pool>", format!("host {}: {}", host.name, e))
        })?;

        projection.claim(&host, &datastore_choice.id, &requirements);

        Ok(MigrationRequest {
            sequence,
            workload: workload.clone(),
            requirements,
            placement: DestinationPlacement {
                host_id: host.id,
                host_name: host.name,
                datastore_id: datastore_choice.id,
                datastore_name: datastore_choice.name,
                folder_segments,
                resource_pool_segments,
            },
            network_mapping: self.network_mapping.clone(),
            options: self.options.clone(),
        })
    }

    async fn hosts_mounting(
        &self,
        hosts: Vec<HostCandidate>,
        datastore_id: &str,
    ) -> VmigrateResult<Vec<HostCandidate>> {
        let mut mounting = Vec::with_capacity(hosts.len());
        for host in hosts {
            let mounted = self.target.host_datastores(&host.id).await?;
            if mounted.iter().any(|ds| ds.id == datastore_id) {
                mounting.push(host);
            }
        }
        Ok(mounting)
    }
}
