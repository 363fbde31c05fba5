//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use vmigrate_core::credentials::StaticCredentialStore;
use vmigrate_core::domain::inventory::{DatastoreSpec, HostSpec, WorkloadSpec};
use vmigrate_core::domain::{InMemoryDomain, InMemoryFabric};
use vmigrate_core::types::{Credentials, NetworkBacking};
use vmigrate_core::{MigrationOrchestrator, MigrationPlan, VmigrateConfig};

pub const SOURCE: &str = "vc-a.lab";
pub const TARGET: &str = "vc-b.lab";

pub struct Scenario {
    pub fabric: InMemoryFabric,
    pub source: Arc<InMemoryDomain>,
    pub target: Arc<InMemoryDomain>,
}

impl Scenario {
    /// Source cluster `SrcCluster`, target cluster `DstCluster` with
    /// `hosts` idle 8-core / 64 GB hosts sharing one large datastore
    pub fn new(hosts: usize) -> Self {
        let fabric = InMemoryFabric::new();

        let source = fabric.add_domain(SOURCE);
        source.add_datacenter("Site-A");
        source.add_cluster("Site-A", "SrcCluster").unwrap();
        source.add_network("VM Network", NetworkBacking::Standard);
        source.add_network("Prod-A", NetworkBacking::Standard);

        let target = fabric.add_domain(TARGET);
        target.add_datacenter("Site-B");
        target.add_cluster("Site-B", "DstCluster").unwrap();
        target.add_datastore(&DatastoreSpec::new("shared-ds", 10_000.0, 8_000.0));
        target.add_network("VM Network", NetworkBacking::Standard);
        target.add_network("Prod-B", NetworkBacking::Distributed);
        target.add_network("mgmt-management", NetworkBacking::Standard);
        for i in 0..hosts {
            target
                .add_host(
                    "DstCluster",
                    &HostSpec::new(format!("esx{:02}", i + 1), 8, 65_536).mount("shared-ds"),
                )
                .unwrap();
        }

        Self {
            fabric,
            source,
            target,
        }
    }

    pub fn add_workload(&self, name: &str, folder: &str, network: &str) {
        self.source
            .add_workload(&WorkloadSpec::new(name, "SrcCluster").folder(folder).adapter(network))
            .unwrap();
    }

    pub fn add_sized_workload(&self, name: &str, cpu: u32, memory_mb: u64) {
        self.source
            .add_workload(
                &WorkloadSpec::new(name, "SrcCluster")
                    .size(cpu, memory_mb, 20.0)
                    .folder("Batch")
                    .adapter("VM Network"),
            )
            .unwrap();
    }

    pub fn orchestrator(&self, config: VmigrateConfig) -> MigrationOrchestrator {
        let credentials = StaticCredentialStore::new()
            .with(SOURCE, Credentials::new("svc-migrate", "pw-a"))
            .with(TARGET, Credentials::new("svc-migrate", "pw-b"));
        MigrationOrchestrator::new(config, Arc::new(self.fabric.clone()), Arc::new(credentials))
    }

    pub fn plan(&self, names: &[&str]) -> MigrationPlan {
        MigrationPlan::new(SOURCE, TARGET).workloads(names.iter().copied())
    }
}

pub fn config(max_concurrency: usize) -> VmigrateConfig {
    let mut config = VmigrateConfig::default();
    config.scheduler.max_concurrency = max_concurrency;
    config
}
