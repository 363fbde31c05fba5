//! Top-level run: setup, request building, scheduling, summary
//!
//! Only setup can abort a run. Once the first request has been built, every
//! requested workload ends up in the summary as either a success or a
//! failure.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::VmigrateConfig;
use crate::credentials::CredentialStore;
use crate::domain::{DomainConnectionProvider, DomainProviderRegistry, DomainSession};
use crate::error::{VmigrateError, VmigrateResult};
use crate::executor::{ExecutorContext, MigrationExecutor, MigrationPhase};
use crate::hierarchy::HierarchyReplicator;
use crate::network_remap::NetworkRemapper;
use crate::observability::setup_span;
use crate::placement::PlacementResolver;
use crate::plan::MigrationPlan;
use crate::request_builder::{DestinationScope, MigrationRequestBuilder};
use crate::results::{MigrationResult, MigrationSummary, ResultAggregator};
use crate::scheduler::JobScheduler;
use crate::types::{Credentials, DomainEndpoint, WorkloadRef};

pub struct MigrationOrchestrator {
    config: VmigrateConfig,
    provider: Arc<dyn DomainConnectionProvider>,
    credentials: Arc<dyn CredentialStore>,
}

/// State established before any request is built
struct SetupState {
    source: Arc<dyn DomainSession>,
    target: Arc<dyn DomainSession>,
    source_credentials: Credentials,
    target_credentials: Credentials,
    scope: DestinationScope,
}

impl MigrationOrchestrator {
    pub fn new(
        config: VmigrateConfig,
        provider: Arc<dyn DomainConnectionProvider>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            provider,
            credentials,
        }
    }

    /// Build an orchestrator whose provider comes from `registry` per the config
    pub fn from_registry(
        config: VmigrateConfig,
        registry: &DomainProviderRegistry,
        credentials: Arc<dyn CredentialStore>,
    ) -> VmigrateResult<Self> {
        let provider = registry.create_provider(&config.provider)?;
        Ok(Self::new(config, provider, credentials))
    }

    pub fn config(&self) -> &VmigrateConfig {
        &self.config
    }

    /// Execute a plan
    ///
    /// Returns `Err` only for setup failures (invalid plan or configuration,
    /// unreachable domain, missing destination cluster or datastore, no
    /// workload resolved). Per-workload failures are part of the summary.
    pub async fn run(&self, plan: &MigrationPlan) -> VmigrateResult<MigrationSummary> {
        self.config.validate()?;
        plan.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let aggregator = ResultAggregator::new();

        let setup = self
            .setup(plan)
            .instrument(setup_span(&plan.source.address, &plan.target.address))
            .await
            .map_err(|e| {
                if e.is_fatal() {
                    e
                } else {
                    VmigrateError::setup(e.to_string())
                }
            })?;

        let names = dedup_names(&plan.workloads);
        let workloads = self
            .resolve_workloads(setup.source.as_ref(), &names, &aggregator)
            .await;
        if workloads.is_empty() {
            return Err(VmigrateError::setup(format!(
                "none of the {} requested workloads exist in '{}'",
                names.len(),
                plan.source.address
            )));
        }

        info!(
            run_id = %run_id,
            requested = names.len(),
            resolved = workloads.len(),
            "Building migration requests"
        );

        let builder = MigrationRequestBuilder::new(
            setup.source.clone(),
            setup.target.clone(),
            PlacementResolver::new(&self.config.placement),
            setup.scope.clone(),
            plan.network_mapping.clone(),
            plan.options.clone(),
        );
        let built = builder.build_all(&workloads).await;
        for rejected in built.rejected {
            aggregator.record(rejected);
        }

        let context = Arc::new(ExecutorContext {
            provider: self.provider.clone(),
            source: plan.source.clone(),
            target: plan.target.clone(),
            source_credentials: setup.source_credentials,
            target_credentials: setup.target_credentials,
            replicator: HierarchyReplicator::new(),
            remapper: NetworkRemapper::new(&self.config.network),
            relocate_timeout: self.config.scheduler.relocate_timeout,
        });
        let executor = Arc::new(MigrationExecutor::new(context));

        JobScheduler::new(self.config.scheduler.clone())
            .run(built.requests, executor, &aggregator)
            .await;

        let summary = aggregator.summarize(run_id, names.len());
        info!(
            run_id = %summary.run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            degraded = summary.degraded,
            outcome = %summary.outcome,
            "Migration run finished"
        );
        Ok(summary)
    }

    async fn setup(&self, plan: &MigrationPlan) -> VmigrateResult<SetupState> {
        let source_credentials = self.credentials.credentials_for(&plan.source.address)?;
        let target_credentials = self.credentials.credentials_for(&plan.target.address)?;

        let source = self.connect("source", &plan.source, &source_credentials).await?;
        let target = self.connect("target", &plan.target, &target_credentials).await?;

        let mut scope = DestinationScope::default();
        if let Some(name) = &plan.destination_cluster {
            let cluster = target.find_cluster(name).await?.ok_or_else(|| {
                VmigrateError::setup(format!(
                    "destination cluster '{}' not found in '{}'",
                    name, plan.target.address
                ))
            })?;
            info!(cluster = %cluster.name, "Using destination cluster override");
            scope.cluster = Some(cluster);
        }
        if let Some(name) = &plan.destination_datastore {
            let datastore = target.find_datastore(name).await?.ok_or_else(|| {
                VmigrateError::setup(format!(
                    "destination datastore '{}' not found in '{}'",
                    name, plan.target.address
                ))
            })?;
            info!(datastore = %datastore.name, "Using destination datastore override");
            scope.datastore = Some(datastore);
        }

        Ok(SetupState {
            source,
            target,
            source_credentials,
            target_credentials,
            scope,
        })
    }

    async fn connect(
        &self,
        role: &str,
        endpoint: &DomainEndpoint,
        credentials: &Credentials,
    ) -> VmigrateResult<Arc<dyn DomainSession>> {
        match self.provider.connect(endpoint, credentials).await {
            Ok(session) => {
                info!("Connected to {} domain '{}'", role, endpoint);
                Ok(session)
            }
            Err(e) => Err(VmigrateError::setup(format!(
                "cannot connect to {} domain '{}': {}",
                role, endpoint, e
            ))),
        }
    }

    /// Look up each name; misses become lookup failures
    async fn resolve_workloads(
        &self,
        source: &dyn DomainSession,
        names: &[String],
        aggregator: &ResultAggregator,
    ) -> Vec<WorkloadRef> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            let started_at = chrono::Utc::now();
            let lookup = match source.find_workload(name).await {
                Ok(Some(workload)) => Ok(workload),
                Ok(None) => Err(VmigrateError::not_found(format!("workload '{}'", name))),
                Err(e) => Err(VmigrateError::not_found(format!("workload '{}' ({})", name, e))),
            };
            match lookup {
                Ok(workload) => resolved.push(workload),
                Err(e) => {
                    aggregator.record(MigrationResult::failed(
                        name,
                        MigrationPhase::Planning,
                        &e,
                        started_at,
                    ));
                }
            }
        }
        resolved
    }
}

/// Trim names, drop blanks and keep the first of any duplicates
fn dedup_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(names.len());
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if seen.insert(name.to_string()) {
            unique.push(name.to_string());
        } else {
            warn!(workload = name, "Workload requested more than once; migrating it once");
        }
    }
    unique
}
