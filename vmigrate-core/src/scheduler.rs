//! Bounded-concurrency job scheduler
//!
//! Requests are launched in queue order while fewer than `max_concurrency`
//! jobs are in flight. The scheduler then waits for the next completion,
//! waking every `progress_interval` to log what each running job is doing.
//! Each finished job's result goes straight to the [`ResultAggregator`].
//!
//! A job that panics is caught inside its own task and reported as a failure
//! in the phase it had reached. A task that ends without a result (cancelled,
//! or panicking outside the catch) is reported as failed as soon as it is
//! joined, freeing its slot, so every request yields exactly one result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

use crate::config::SchedulerConfig;
use crate::error::VmigrateError;
use crate::executor::{MigrationExecutor, MigrationPhase};
use crate::observability::job_span;
use crate::request_builder::MigrationRequest;
use crate::results::{MigrationResult, ResultAggregator};

/// Runs one request to completion
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(
        &self,
        request: MigrationRequest,
        phase: watch::Sender<MigrationPhase>,
    ) -> MigrationResult;
}

#[async_trait]
impl JobRunner for MigrationExecutor {
    async fn run(
        &self,
        request: MigrationRequest,
        phase: watch::Sender<MigrationPhase>,
    ) -> MigrationResult {
        self.execute(&request, phase).await
    }
}

/// Scheduler-side view of one in-flight job
#[derive(Debug)]
pub struct JobHandle {
    pub sequence: usize,
    pub workload: String,
    pub started_at: DateTime<Utc>,
    phase: watch::Receiver<MigrationPhase>,
}

impl JobHandle {
    pub fn phase(&self) -> MigrationPhase {
        *self.phase.borrow()
    }

    fn into_lost_result(self, reason: &str) -> MigrationResult {
        let phase = self.phase();
        MigrationResult::failed(
            self.workload,
            phase,
            &VmigrateError::Internal {
                message: format!("job ended without reporting a result: {}", reason),
            },
            self.started_at,
        )
    }
}

/// Counters from one scheduling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleStats {
    pub launched: usize,
    pub completed: usize,
    pub lost: usize,
    pub peak_in_flight: usize,
}

#[derive(Debug, Clone)]
pub struct JobScheduler {
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn max_concurrency(&self) -> usize {
        self.config.max_concurrency.max(1)
    }

    /// Drain `requests` through `runner`, recording every result in `aggregator`
    pub async fn run(
        &self,
        requests: Vec<MigrationRequest>,
        runner: Arc<dyn JobRunner>,
        aggregator: &ResultAggregator,
    ) -> ScheduleStats {
        let limit = self.max_concurrency();
        let total = requests.len();
        let mut queue: VecDeque<MigrationRequest> = requests.into();
        let mut in_flight: BTreeMap<usize, JobHandle> = BTreeMap::new();
        let mut task_sequences: HashMap<Id, usize> = HashMap::new();
        let mut tasks: JoinSet<(usize, MigrationResult)> = JoinSet::new();
        let mut stats = ScheduleStats::default();

        let mut ticker = interval(self.config.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!(total, max_concurrency = limit, "Starting job scheduler");

        loop {
            while in_flight.len() < limit {
                let Some(request) = queue.pop_front() else {
                    break;
                };
                let (task_id, handle) = Self::launch(&mut tasks, request, runner.clone());
                task_sequences.insert(task_id, handle.sequence);
                debug!(workload = %handle.workload, seq = handle.sequence, "Launched job");
                in_flight.insert(handle.sequence, handle);
                stats.launched += 1;
                stats.peak_in_flight = stats.peak_in_flight.max(in_flight.len());
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next_with_id() => match joined {
                    Some(Ok((task_id, (sequence, result)))) => {
                        task_sequences.remove(&task_id);
                        in_flight.remove(&sequence);
                        aggregator.record(result);
                        stats.completed += 1;
                    }
                    Some(Err(e)) => {
                        error!("Migration task ended abnormally: {}", e);
                        let handle = task_sequences
                            .remove(&e.id())
                            .and_then(|sequence| in_flight.remove(&sequence));
                        match handle {
                            Some(handle) => {
                                aggregator.record(handle.into_lost_result(&e.to_string()));
                                stats.lost += 1;
                            }
                            None => warn!("Abnormal task had no tracked job"),
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.log_progress(&in_flight, queue.len(), aggregator);
                }
            }
        }

        for (_, handle) in std::mem::take(&mut in_flight) {
            error!(workload = %handle.workload, "Job lost; recording failure");
            aggregator.record(handle.into_lost_result("task set drained"));
            stats.lost += 1;
        }
        // Only reachable if the task set drained early
        for request in queue.drain(..) {
            aggregator.record(MigrationResult::failed(
                &request.workload.name,
                MigrationPhase::NotStarted,
                &VmigrateError::Internal {
                    message: "scheduler stopped before the job started".to_string(),
                },
                Utc::now(),
            ));
            stats.lost += 1;
        }

        info!(
            launched = stats.launched,
            completed = stats.completed,
            lost = stats.lost,
            "Job scheduler finished"
        );
        stats
    }

    fn launch(
        tasks: &mut JoinSet<(usize, MigrationResult)>,
        request: MigrationRequest,
        runner: Arc<dyn JobRunner>,
    ) -> (Id, JobHandle) {
        let sequence = request.sequence;
        let workload = request.workload.name.clone();
        let started_at = Utc::now();
        let (phase_tx, phase_rx) = watch::channel(MigrationPhase::NotStarted);
        let task_phase = phase_rx.clone();
        let span = job_span(&workload, sequence);

        let task_workload = workload.clone();
        let abort = tasks.spawn(
            async move {
                let outcome = AssertUnwindSafe(runner.run(request, phase_tx))
                    .catch_unwind()
                    .await;
                let result = match outcome {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        let phase = *task_phase.borrow();
                        error!("Job panicked during {}: {}", phase, message);
                        MigrationResult::failed(
                            task_workload,
                            phase,
                            &VmigrateError::Internal {
                                message: format!("job panicked: {}", message),
                            },
                            started_at,
                        )
                    }
                };
                (sequence, result)
            }
            .instrument(span),
        );

        (
            abort.id(),
            JobHandle {
                sequence,
                workload,
                started_at,
                phase: phase_rx,
            },
        )
    }

    fn log_progress(
        &self,
        in_flight: &BTreeMap<usize, JobHandle>,
        queued: usize,
        aggregator: &ResultAggregator,
    ) {
        let (succeeded, failed) = aggregator.progress();
        info!(
            running = in_flight.len(),
            queued,
            succeeded,
            failed,
            "Migration progress"
        );
        for handle in in_flight.values() {
            let elapsed = Utc::now() - handle.started_at;
            info!(
                workload = %handle.workload,
                phase = %handle.phase(),
                elapsed_secs = elapsed.num_seconds(),
                "Job still running"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::MigrationOptions;
    use crate::request_builder::DestinationPlacement;
    use crate::types::{NetworkMapping, ResourceRequirements, WorkloadRef};
    use parking_lot::Mutex;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn request(sequence: usize) -> MigrationRequest {
        MigrationRequest {
            sequence,
            workload: WorkloadRef {
                name: format!("vm{:02}", sequence),
                id: format!("vm-{}", sequence),
            },
            requirements: ResourceRequirements {
                cpu_count: 1,
                memory_mb: 1_024,
                used_space_gb: 10.0,
            },
            placement: DestinationPlacement {
                host_id: "host-1".into(),
                host_name: "esx1".into(),
                datastore_id: "ds-1".into(),
                datastore_name: "ds1".into(),
                folder_segments: Vec::new(),
                resource_pool_segments: Vec::new(),
            },
            network_mapping: Arc::new(NetworkMapping::new()),
            options: Arc::new(MigrationOptions::default()),
        }
    }

    /// Sleeps for a per-item time and tracks concurrency
    #[derive(Default)]
    struct CountingRunner {
        active: AtomicUsize,
        peak: AtomicUsize,
        finished: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run(
            &self,
            request: MigrationRequest,
            phase: watch::Sender<MigrationPhase>,
        ) -> MigrationResult {
            let started = Utc::now();
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            phase.send_replace(MigrationPhase::Relocating);

            // Later items are quicker, so completion order differs from launch order
            let millis = 50 - (request.sequence as u64 % 5) * 10;
            tokio::time::sleep(Duration::from_millis(millis)).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.lock().push(request.workload.name.clone());
            if request.sequence == 3 {
                return MigrationResult::failed(
                    &request.workload.name,
                    MigrationPhase::Relocating,
                    &VmigrateError::execution("relocate", "boom"),
                    started,
                );
            }
            MigrationResult::succeeded(&request.workload.name, started)
        }
    }

    fn config(max_concurrency: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrency,
            progress_interval: Duration::from_millis(5),
            ..SchedulerConfig::default()
        }
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(8)]
    #[tokio::test]
    async fn test_never_exceeds_concurrency_and_accounts_for_every_item(#[case] limit: usize) {
        let runner = Arc::new(CountingRunner::default());
        let aggregator = ResultAggregator::new();
        let requests: Vec<_> = (0..10).map(request).collect();

        let stats = JobScheduler::new(config(limit))
            .run(requests, runner.clone(), &aggregator)
            .await;

        assert!(runner.peak.load(Ordering::SeqCst) <= limit);
        assert_eq!(stats.peak_in_flight, limit.min(10));
        assert_eq!(stats.launched, 10);
        assert_eq!(stats.lost, 0);

        let summary = aggregator.summarize("t", 10);
        assert_eq!(summary.processed, 10);
        assert_eq!(summary.succeeded, 9);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_sequential_mode_completes_in_submission_order() {
        let runner = Arc::new(CountingRunner::default());
        let aggregator = ResultAggregator::new();
        let requests: Vec<_> = (0..6).map(request).collect();

        JobScheduler::new(config(1))
            .run(requests, runner.clone(), &aggregator)
            .await;

        let expected: Vec<String> = (0..6).map(|i| format!("vm{:02}", i)).collect();
        assert_eq!(*runner.finished.lock(), expected);
        let recorded: Vec<String> = aggregator
            .summarize("t", 6)
            .results
            .into_iter()
            .map(|r| r.workload)
            .collect();
        assert_eq!(recorded, expected);
    }

    struct PanickyRunner;

    #[async_trait]
    impl JobRunner for PanickyRunner {
        async fn run(
            &self,
            request: MigrationRequest,
            phase: watch::Sender<MigrationPhase>,
        ) -> MigrationResult {
            phase.send_replace(MigrationPhase::PlacingInHierarchy);
            if request.sequence == 1 {
                panic!("tree exploded");
            }
            MigrationResult::succeeded(&request.workload.name, Utc::now())
        }
    }

    #[tokio::test]
    async fn test_panicking_job_becomes_failure() {
        let aggregator = ResultAggregator::new();
        let requests: Vec<_> = (0..3).map(request).collect();

        let stats = JobScheduler::new(config(2))
            .run(requests, Arc::new(PanickyRunner), &aggregator)
            .await;

        assert_eq!(stats.completed, 3);
        let summary = aggregator.summarize("t", 3);
        assert_eq!(summary.succeeded, 2);
        let failure = &summary.failures[0];
        assert_eq!(failure.workload, "vm01");
        assert_eq!(failure.phase, MigrationPhase::PlacingInHierarchy);
        assert!(failure.message.contains("tree exploded"));
    }

    /// Panic payload that panics again when the catch drops it
    struct ExplodingPayload;

    impl Drop for ExplodingPayload {
        fn drop(&mut self) {
            panic!("payload dropped");
        }
    }

    struct EscapingRunner;

    #[async_trait]
    impl JobRunner for EscapingRunner {
        async fn run(
            &self,
            request: MigrationRequest,
            phase: watch::Sender<MigrationPhase>,
        ) -> MigrationResult {
            phase.send_replace(MigrationPhase::Relocating);
            if request.sequence == 0 {
                std::panic::panic_any(ExplodingPayload);
            }
            MigrationResult::succeeded(&request.workload.name, Utc::now())
        }
    }

    #[tokio::test]
    async fn test_abnormal_task_is_recorded_and_frees_its_slot() {
        let aggregator = ResultAggregator::new();
        let requests: Vec<_> = (0..3).map(request).collect();

        let stats = JobScheduler::new(config(1))
            .run(requests, Arc::new(EscapingRunner), &aggregator)
            .await;

        assert_eq!(stats.launched, 3);
        assert_eq!(stats.lost, 1);
        assert_eq!(stats.completed, 2);
        let summary = aggregator.summarize("t", 3);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 2);
        let failure = &summary.failures[0];
        assert_eq!(failure.workload, "vm00");
        assert_eq!(failure.phase, MigrationPhase::Relocating);
    }

    #[tokio::test]
    async fn test_empty_queue_finishes_immediately() {
        let aggregator = ResultAggregator::new();
        let stats = JobScheduler::new(config(2))
            .run(Vec::new(), Arc::new(PanickyRunner), &aggregator)
            .await;
        assert_eq!(stats, ScheduleStats::default());
        assert!(aggregator.is_empty());
    }
}
