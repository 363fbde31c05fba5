//! Per-request migration state machine
//!
//! ```text
//! NotStarted -> Connecting -> Relocating -> PlacingInHierarchy
//!            -> RemappingNetwork -> Renaming -> Completed
//! (any phase) -> Failed
//! ```
//!
//! Each job opens its own pair of sessions and never shares them. Any error is
//! caught here and becomes a failed [`MigrationResult`] tagged with the phase
//! it happened in; nothing escapes to sibling jobs.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::domain::{DomainConnectionProvider, DomainSession};
use crate::error::{ErrorKind, VmigrateError, VmigrateResult};
use crate::hierarchy::HierarchyReplicator;
use crate::network_remap::NetworkRemapper;
use crate::request_builder::MigrationRequest;
use crate::results::MigrationResult;
use crate::types::{Credentials, DomainEndpoint, RelocateSpec, WorkloadRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationPhase {
    /// Request building, before the job exists
    Planning,
    NotStarted,
    Connecting,
    Relocating,
    PlacingInHierarchy,
    RemappingNetwork,
    Renaming,
    Completed,
    Failed,
}

impl MigrationPhase {
    /// Reporting category for failures in this phase
    ///
    /// `None` means the error's own category applies.
    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            MigrationPhase::Connecting => Some(ErrorKind::Connection),
            MigrationPhase::Relocating => Some(ErrorKind::Execution),
            MigrationPhase::PlacingInHierarchy => Some(ErrorKind::Hierarchy),
            MigrationPhase::RemappingNetwork => Some(ErrorKind::Network),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationPhase::Completed | MigrationPhase::Failed)
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything a job needs besides its request
#[derive(Clone)]
pub struct ExecutorContext {
    pub provider: Arc<dyn DomainConnectionProvider>,
    pub source: DomainEndpoint,
    pub target: DomainEndpoint,
    pub source_credentials: Credentials,
    pub target_credentials: Credentials,
    pub replicator: HierarchyReplicator,
    pub remapper: NetworkRemapper,
    pub relocate_timeout: Duration,
}

pub struct MigrationExecutor {
    context: Arc<ExecutorContext>,
}

struct PhaseTracker {
    current: MigrationPhase,
    publish: watch::Sender<MigrationPhase>,
}

impl PhaseTracker {
    fn advance(&mut self, phase: MigrationPhase) {
        self.current = phase;
        self.publish.send_replace(phase);
        tracing::Span::current().record("phase", tracing::field::display(phase));
    }
}

#[derive(Default)]
struct JobNotes {
    degraded: bool,
    final_name: Option<String>,
    warnings: Vec<String>,
}

impl MigrationExecutor {
    pub fn new(context: Arc<ExecutorContext>) -> Self {
        Self { context }
    }

    /// Drive one request to a terminal phase
    ///
    /// Phase transitions are published on `phase` as they happen.
    pub async fn execute(
        &self,
        request: &MigrationRequest,
        phase: watch::Sender<MigrationPhase>,
    ) -> MigrationResult {
        let started_at = Utc::now();
        let mut tracker = PhaseTracker {
            current: MigrationPhase::NotStarted,
            publish: phase,
        };
        tracker.advance(MigrationPhase::NotStarted);
        let mut notes = JobNotes::default();

        match self.drive(request, &mut tracker, &mut notes).await {
            Ok(()) => {
                tracker.advance(MigrationPhase::Completed);
                let mut result = MigrationResult::succeeded(&request.workload.name, started_at);
                result.degraded = notes.degraded;
                result.final_name = notes.final_name;
                result.warnings = notes.warnings;
                info!(
                    duration_ms = result.duration().as_millis() as u64,
                    degraded = result.degraded,
                    "Migration completed"
                );
                result
            }
            Err(e) => {
                let failed_in = tracker.current;
                tracker.advance(MigrationPhase::Failed);
                let mut result =
                    MigrationResult::failed(&request.workload.name, failed_in, &e, started_at);
                result.warnings = notes.warnings;
                result
            }
        }
    }

    async fn drive(
        &self,
        request: &MigrationRequest,
        tracker: &mut PhaseTracker,
        notes: &mut JobNotes,
    ) -> VmigrateResult<()> {
        let ctx = &self.context;
        let placement = &request.placement;

        tracker.advance(MigrationPhase::Connecting);
        let source = ctx
            .provider
            .connect(&ctx.source, &ctx.source_credentials)
            .await?;
        let target = ctx
            .provider
            .connect(&ctx.target, &ctx.target_credentials)
            .await?;

        tracker.advance(MigrationPhase::Relocating);
        // Captured on the source, immediately before the move
        let snapshots = ctx
            .remapper
            .capture_config(source.as_ref(), &request.workload)
            .await?;
        let spec = RelocateSpec {
            target_address: ctx.target.address.clone(),
            host_id: placement.host_id.clone(),
            datastore_id: placement.datastore_id.clone(),
            disk_format: request.options.disk_format,
        };
        let moved = self
            .relocate_bounded(source.as_ref(), &request.workload, &spec)
            .await?;

        tracker.advance(MigrationPhase::PlacingInHierarchy);
        self.place_in_hierarchy(target.as_ref(), request, &moved).await?;

        tracker.advance(MigrationPhase::RemappingNetwork);
        if !snapshots.is_empty() {
            let remapped = ctx
                .remapper
                .apply_config(
                    target.as_ref(),
                    &moved,
                    &snapshots,
                    &request.network_mapping,
                    request.options.remap_options(),
                )
                .await;
            match remapped {
                Ok(report) => {
                    for adapter in report.adapters.iter().filter(|a| a.fell_back) {
                        notes.warnings.push(format!(
                            "{}: '{}' replaced by fallback '{}'",
                            adapter.adapter,
                            request.network_mapping.target_for(&adapter.source_network),
                            adapter.target_network
                        ));
                    }
                }
                Err(e) if request.options.ignore_network_errors => {
                    warn!("Ignoring network remap failure: {}", e);
                    notes.degraded = true;
                    notes.warnings.push(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        tracker.advance(MigrationPhase::Renaming);
        if let Some(suffix) = request.options.effective_suffix() {
            let new_name = format!("{}{}", moved.name, suffix);
            match target.rename_workload(&moved, &new_name).await {
                Ok(()) => {
                    info!("Renamed to '{}'", new_name);
                    notes.final_name = Some(new_name);
                }
                Err(e) => {
                    warn!("Rename to '{}' failed, keeping '{}': {}", new_name, moved.name, e);
                    notes.warnings.push(format!("rename failed: {}", e));
                }
            }
        }

        Ok(())
    }

    async fn relocate_bounded(
        &self,
        source: &dyn DomainSession,
        workload: &WorkloadRef,
        spec: &RelocateSpec,
    ) -> VmigrateResult<WorkloadRef> {
        let limit = self.context.relocate_timeout;
        info!(
            host = %spec.host_id,
            datastore = %spec.datastore_id,
            disk_format = %spec.disk_format,
            "Relocating"
        );
        match tokio::time::timeout(limit, source.relocate(workload, spec)).await {
            Ok(result) => result,
            Err(_) => Err(VmigrateError::Timeout {
                operation: format!("relocate of '{}'", workload.name),
                duration: limit,
            }),
        }
    }

    async fn place_in_hierarchy(
        &self,
        target: &dyn DomainSession,
        request: &MigrationRequest,
        moved: &WorkloadRef,
    ) -> VmigrateResult<()> {
        let replicator = &self.context.replicator;
        let placement = &request.placement;

        let root_folder = target.root_folder(&placement.host_id).await?;
        let folder = replicator
            .ensure_destination_path(target, &placement.folder_segments, &root_folder)
            .await?;
        target.move_to_folder(moved, &folder).await?;

        let root_pool = target.root_resource_pool(&placement.host_id).await?;
        let pool = replicator
            .ensure_destination_path(target, &placement.resource_pool_segments, &root_pool)
            .await?;
        target.move_to_resource_pool(moved, &pool).await?;

        Ok(())
    }
}
