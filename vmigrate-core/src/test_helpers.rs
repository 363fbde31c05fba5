//! Canned source and target domains for unit and integration tests
//!
//! `TestFabric::standard()` gives a small but complete pair of domains:
//!
//! - source `vc-src.test`: cluster `C1` with workloads `web01`, `web02`
//!   (folder `Prod/Web`, pool `Gold`), `app01` (folder `Prod/App`) and
//!   `db01` (folder `Prod/Db`, pool `Gold/Tier1`), each with one adapter on
//!   `VM Network`
//! - target `vc-dst.test`: cluster `C2` with two idle hosts (`esx-a`,
//!   `esx-b`), two datastores, and networks `VM Network`, `Prod-DV`
//!   (distributed) and `Management`

use std::sync::Arc;

use crate::config::VmigrateConfig;
use crate::credentials::StaticCredentialStore;
use crate::domain::inventory::{DatastoreSpec, HostSpec, WorkloadSpec};
use crate::domain::{DomainConnectionProvider, InMemoryDomain, InMemoryFabric};
use crate::executor::ExecutorContext;
use crate::hierarchy::HierarchyReplicator;
use crate::network_remap::NetworkRemapper;
use crate::orchestrator::MigrationOrchestrator;
use crate::placement::PlacementResolver;
use crate::plan::{MigrationOptions, MigrationPlan};
use crate::request_builder::{DestinationScope, MigrationRequest, MigrationRequestBuilder};
use crate::types::{Credentials, DomainEndpoint, NetworkBacking, NetworkMapping};

pub const SOURCE_ADDRESS: &str = "vc-src.test";
pub const TARGET_ADDRESS: &str = "vc-dst.test";

pub fn credentials() -> Credentials {
    Credentials::new("administrator", "secret")
}

pub struct TestFabric {
    fabric: InMemoryFabric,
    options: MigrationOptions,
    mapping: NetworkMapping,
    config: VmigrateConfig,
}

impl TestFabric {
    /// Both domains with a datacenter and cluster, nothing else
    pub fn empty() -> Self {
        let fabric = InMemoryFabric::new();

        let source = fabric.add_domain(SOURCE_ADDRESS);
        source.require_credentials(credentials());
        source.add_datacenter("DC-Src");
        source.add_cluster("DC-Src", "C1").expect("source cluster");
        source.add_network("VM Network", NetworkBacking::Standard);

        let target = fabric.add_domain(TARGET_ADDRESS);
        target.require_credentials(credentials());
        target.add_datacenter("DC-Dst");
        target.add_cluster("DC-Dst", "C2").expect("target cluster");

        Self {
            fabric,
            options: MigrationOptions::default(),
            mapping: NetworkMapping::new(),
            config: VmigrateConfig::default(),
        }
    }

    pub fn standard() -> Self {
        let fixture = Self::empty();

        let source = fixture.source();
        for (name, folder, pool) in [
            ("web01", "Prod/Web", "Gold"),
            ("web02", "Prod/Web", "Gold"),
            ("app01", "Prod/App", ""),
            ("db01", "Prod/Db", "Gold/Tier1"),
        ] {
            source
                .add_workload(
                    &WorkloadSpec::new(name, "C1")
                        .folder(folder)
                        .resource_pool(pool)
                        .adapter("VM Network"),
                )
                .expect("source workload");
        }

        let target = fixture.target();
        target.add_datastore(&DatastoreSpec::new("ds-a", 2_000.0, 1_500.0));
        target.add_datastore(&DatastoreSpec::new("ds-b", 2_000.0, 1_200.0));
        target.add_network("VM Network", NetworkBacking::Standard);
        target.add_network("Prod-DV", NetworkBacking::Distributed);
        target.add_network("Management", NetworkBacking::Standard);
        for name in ["esx-a", "esx-b"] {
            target
                .add_host(
                    "C2",
                    &HostSpec::new(name, 16, 131_072).mount("ds-a").mount("ds-b"),
                )
                .expect("target host");
        }

        fixture
    }

    pub fn with_options(mut self, update: impl FnOnce(&mut MigrationOptions)) -> Self {
        update(&mut self.options);
        self
    }

    pub fn with_mapping(mut self, source: &str, target: &str) -> Self {
        self.mapping.insert(source, target);
        self
    }

    pub fn with_config(mut self, update: impl FnOnce(&mut VmigrateConfig)) -> Self {
        update(&mut self.config);
        self
    }

    pub fn fabric(&self) -> &InMemoryFabric {
        &self.fabric
    }

    pub fn source(&self) -> Arc<InMemoryDomain> {
        self.fabric.domain(SOURCE_ADDRESS).expect("source domain")
    }

    pub fn target(&self) -> Arc<InMemoryDomain> {
        self.fabric.domain(TARGET_ADDRESS).expect("target domain")
    }

    pub fn credential_store(&self) -> StaticCredentialStore {
        StaticCredentialStore::new()
            .with(SOURCE_ADDRESS, credentials())
            .with(TARGET_ADDRESS, credentials())
    }

    /// Plan over `names` with this fixture's options and mapping
    pub fn plan(&self, names: &[&str]) -> MigrationPlan {
        let mut plan = MigrationPlan::new(SOURCE_ADDRESS, TARGET_ADDRESS)
            .workloads(names.iter().copied())
            .options(self.options.clone());
        plan.network_mapping = self.mapping.clone();
        plan
    }

    pub fn orchestrator(&self) -> MigrationOrchestrator {
        MigrationOrchestrator::new(
            self.config.clone(),
            Arc::new(self.fabric.clone()),
            Arc::new(self.credential_store()),
        )
    }

    /// Build the request for one workload the way a run would
    pub async fn request_for(&self, name: &str) -> MigrationRequest {
        let source = self
            .fabric
            .connect(&DomainEndpoint::new(SOURCE_ADDRESS), &credentials())
            .await
            .expect("source session");
        let target = self
            .fabric
            .connect(&DomainEndpoint::new(TARGET_ADDRESS), &credentials())
            .await
            .expect("target session");
        let workload = source
            .find_workload(name)
            .await
            .expect("workload lookup")
            .expect("workload exists");

        let mut output = MigrationRequestBuilder::new(
            source,
            target,
            PlacementResolver::new(&self.config.placement),
            DestinationScope::default(),
            self.mapping.clone(),
            self.options.clone(),
        )
        .build_all(&[workload])
        .await;

        assert!(output.rejected.is_empty(), "request rejected: {:?}", output.rejected);
        output.requests.remove(0)
    }

    pub fn executor_context(&self) -> Arc<ExecutorContext> {
        Arc::new(ExecutorContext {
            provider: Arc::new(self.fabric.clone()),
            source: DomainEndpoint::new(SOURCE_ADDRESS),
            target: DomainEndpoint::new(TARGET_ADDRESS),
            source_credentials: credentials(),
            target_credentials: credentials(),
            replicator: HierarchyReplicator::new(),
            remapper: NetworkRemapper::new(&self.config.network),
            relocate_timeout: self.config.scheduler.relocate_timeout,
        })
    }
}
