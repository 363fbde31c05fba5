//! Per-item outcomes and the end-of-run summary

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::error::{ErrorKind, VmigrateError};
use crate::executor::MigrationPhase;

/// Why one workload did not make it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub workload: String,
    pub kind: ErrorKind,
    pub phase: MigrationPhase,
    pub message: String,
}

impl FailureRecord {
    pub fn new(workload: impl Into<String>, phase: MigrationPhase, error: &VmigrateError) -> Self {
        Self {
            workload: workload.into(),
            kind: phase.error_kind().unwrap_or_else(|| error.kind()),
            phase,
            message: error.to_string(),
        }
    }
}

/// Outcome of exactly one requested workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub workload: String,
    pub success: bool,
    /// Succeeded, but with network errors that were ignored
    #[serde(default)]
    pub degraded: bool,
    pub failure: Option<FailureRecord>,
    /// Name at the destination, when a suffix was applied
    #[serde(default)]
    pub final_name: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MigrationResult {
    pub fn succeeded(workload: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            workload: workload.into(),
            success: true,
            degraded: false,
            failure: None,
            final_name: None,
            warnings: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        workload: impl Into<String>,
        phase: MigrationPhase,
        error: &VmigrateError,
        started_at: DateTime<Utc>,
    ) -> Self {
        let workload = workload.into();
        Self {
            failure: Some(FailureRecord::new(workload.clone(), phase, error)),
            workload,
            success: false,
            degraded: false,
            final_name: None,
            warnings: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    AllSucceeded,
    Partial,
    AllFailed,
}

impl RunOutcome {
    /// Process exit code for a run that got past setup
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::AllSucceeded => 0,
            RunOutcome::Partial => 2,
            RunOutcome::AllFailed => 3,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::AllSucceeded => f.write_str("all succeeded"),
            RunOutcome::Partial => f.write_str("partially succeeded"),
            RunOutcome::AllFailed => f.write_str("all failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub run_id: String,
    pub requested: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub degraded: usize,
    pub failed: usize,
    pub failures: Vec<FailureRecord>,
    /// Mean wall time of successful items
    #[serde(with = "humantime_serde")]
    pub average_duration: Option<Duration>,
    pub outcome: RunOutcome,
    pub results: Vec<MigrationResult>,
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migration run {}: {}", self.run_id, self.outcome)?;
        writeln!(f, "  Requested:  {}", self.requested)?;
        writeln!(f, "  Processed:  {}", self.processed)?;
        writeln!(f, "  Succeeded:  {}", self.succeeded)?;
        if self.degraded > 0 {
            writeln!(f, "  Degraded:   {}", self.degraded)?;
        }
        writeln!(f, "  Failed:     {}", self.failed)?;
        if let Some(avg) = self.average_duration {
            writeln!(f, "  Avg time:   {:.1}s", avg.as_secs_f64())?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failures:")?;
            for failure in &self.failures {
                writeln!(
                    f,
                    "  {} [{} during {}]: {}",
                    failure.workload, failure.kind, failure.phase, failure.message
                )?;
            }
        }
        Ok(())
    }
}

/// Append-only, thread-safe collection of results
///
/// Results are kept in arrival order. A second result for the same workload
/// is refused so that every requested item is counted exactly once.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    inner: Mutex<AggregatorState>,
}

#[derive(Debug, Default)]
struct AggregatorState {
    results: Vec<MigrationResult>,
    seen: HashSet<String>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one result; returns false if the workload was already recorded
    pub fn record(&self, result: MigrationResult) -> bool {
        let mut state = self.inner.lock();
        if !state.seen.insert(result.workload.clone()) {
            tracing::error!(workload = %result.workload, "Dropping duplicate result");
            return false;
        }
        if let Some(failure) = &result.failure {
            tracing::warn!(
                workload = %result.workload,
                kind = %failure.kind,
                phase = %failure.phase,
                "Migration failed: {}",
                failure.message
            );
        }
        state.results.push(result);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, workload: &str) -> bool {
        self.inner.lock().seen.contains(workload)
    }

    /// Counts so far: (succeeded, failed)
    pub fn progress(&self) -> (usize, usize) {
        let state = self.inner.lock();
        let succeeded = state.results.iter().filter(|r| r.success).count();
        (succeeded, state.results.len() - succeeded)
    }

    pub fn summarize(&self, run_id: impl Into<String>, requested: usize) -> MigrationSummary {
        let results = self.inner.lock().results.clone();

        let successes: Vec<&MigrationResult> = results.iter().filter(|r| r.success).collect();
        let succeeded = successes.len();
        let degraded = successes.iter().filter(|r| r.degraded).count();
        let failures: Vec<FailureRecord> = results
            .iter()
            .filter_map(|r| r.failure.clone())
            .collect();
        let failed = results.len() - succeeded;

        let average_duration = if succeeded == 0 {
            None
        } else {
            let total: Duration = successes.iter().map(|r| r.duration()).sum();
            Some(total / succeeded as u32)
        };

        let outcome = if failed == 0 && succeeded > 0 {
            RunOutcome::AllSucceeded
        } else if succeeded == 0 {
            RunOutcome::AllFailed
        } else {
            RunOutcome::Partial
        };

        MigrationSummary {
            run_id: run_id.into(),
            requested,
            processed: results.len(),
            succeeded,
            degraded,
            failed,
            failures,
            average_duration,
            outcome,
            results,
        }
    }
}
