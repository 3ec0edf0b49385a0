//! Per-simulator run lifecycle
//!
//! One [`RunLifecycleManager`] dispatch drives a single simulator through:
//!
//! ```text
//! NOT_STARTED ── cache hit ──────────────────► SUCCEEDED (reused)
//!     │
//!     ├── 1. Claim cache key (CAS, first writer wins)
//!     │
//!     ├── 2. Submit archive ────► SUBMITTED
//!     │
//!     ├── 3. Poll remote status ► POLLING
//!     │
//!     └── 4. Fetch outputs ─────► {SUCCEEDED, FAILED, RUN_ID_NOT_FOUND, SKIPPED}
//! ```
//!
//! Remote problems terminate the record, never the process: a failed
//! submission, an exhausted poll budget, or a missing run id all land in
//! the returned [`RunRecord`] as a terminal status with an error message.
//! Only storage failures propagate as errors, because they fail the
//! enclosing request rather than one simulator.

use crate::api::{RemoteRun, RemoteRunStatus, SimulationService, SimulatorIdentity, SubmitRunRequest};
use crate::cache::{CacheKey, CacheKeyResolver, Claim, ObservableSeries, RunRecord, RunStatus, cache_key};
use crate::content::ArchiveRecord;
use crate::error::{Result, VerifyError};
use crate::retry::{RetryPolicy, StepRunner};
use crate::store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default interval between remote status polls
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default maximum wall clock for polling one run
pub const DEFAULT_MAX_POLL_SECS: u64 = 3600;

/// Default maximum remote simulation time (minutes), sent with submission
pub const DEFAULT_MAX_SIM_TIME_MINUTES: u32 = 600;

/// Consecutive poll errors tolerated before the run is declared FAILED
const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 5;

/// Tuning for one lifecycle manager
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Interval between status polls
    pub poll_interval: Duration,

    /// Maximum wall clock spent polling one run
    pub max_poll_duration: Duration,

    /// Retry policy for submission and dataset fetches
    pub retry: RetryPolicy,

    /// Treat a not-found run id as a terminal RUN_ID_NOT_FOUND record
    /// instead of a retryable poll error
    pub abort_on_not_found: bool,

    /// Maximum remote simulation time (minutes)
    pub max_sim_time_minutes: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_poll_duration: Duration::from_secs(DEFAULT_MAX_POLL_SECS),
            retry: RetryPolicy::default(),
            abort_on_not_found: false,
            max_sim_time_minutes: DEFAULT_MAX_SIM_TIME_MINUTES,
        }
    }
}

impl LifecycleConfig {
    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the maximum poll wall clock
    pub fn with_max_poll_duration(mut self, duration: Duration) -> Self {
        self.max_poll_duration = duration;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Treat not-found run ids as terminal records
    pub fn with_abort_on_not_found(mut self, abort: bool) -> Self {
        self.abort_on_not_found = abort;
        self
    }
}

enum PollOutcome {
    Terminal(RemoteRun),
    NotFound,
}

/// Drives one simulator dispatch to a terminal [`RunRecord`]
pub struct RunLifecycleManager {
    service: Arc<dyn SimulationService>,
    objects: Arc<dyn ObjectStore>,
    resolver: CacheKeyResolver,
    runner: StepRunner,
    config: LifecycleConfig,
}

impl RunLifecycleManager {
    /// Create a lifecycle manager
    pub fn new(
        service: Arc<dyn SimulationService>,
        objects: Arc<dyn ObjectStore>,
        resolver: CacheKeyResolver,
        config: LifecycleConfig,
    ) -> Self {
        let runner = StepRunner::new(config.retry.clone());
        Self {
            service,
            objects,
            resolver,
            runner,
            config,
        }
    }

    /// Execute one archive dispatch for `simulator`, consulting the cache
    /// first. Returns the terminal record; only storage failures are `Err`.
    pub async fn execute(
        &self,
        archive: &ArchiveRecord,
        simulator: &SimulatorIdentity,
        cache_buster: &str,
    ) -> Result<RunRecord> {
        let key = cache_key(&archive.content_hash, &simulator.image_digest, cache_buster);
        let pending = RunRecord::pending(key.clone(), simulator.clone());

        match self.resolver.claim(pending.clone()).await? {
            Claim::Owned | Claim::TakenOver => {}
            Claim::Reusable(mut cached) => {
                info!(
                    simulator = %simulator.spec_string(),
                    cache_key = %key,
                    "Reusing cached run, skipping remote dispatch"
                );
                cached.reused = true;
                return Ok(cached);
            }
            Claim::InFlight(_) => {
                info!(
                    simulator = %simulator.spec_string(),
                    cache_key = %key,
                    "Another dispatch owns this cache key, waiting for it"
                );
                let waited = self
                    .resolver
                    .await_terminal(&key, self.config.poll_interval, self.config.max_poll_duration)
                    .await;
                return match waited {
                    Ok(mut winner) => {
                        winner.reused = true;
                        Ok(winner)
                    }
                    Err(VerifyError::Timeout(budget)) => {
                        let mut record = pending;
                        record.fail(format!(
                            "timed out after {budget:?} waiting for in-flight run"
                        ));
                        Ok(record)
                    }
                    Err(e) => Err(e),
                };
            }
        }

        let record = self.dispatch(pending, archive, simulator).await?;
        self.resolver.publish(&record).await?;
        Ok(record)
    }

    /// Attach to an existing remote run by id (run-id verification path).
    ///
    /// No submission and no cache consultation; the record is keyed for
    /// uniformity but request-local.
    pub async fn attach(&self, run_id: &str) -> Result<RunRecord> {
        let key = CacheKey::for_run_id(run_id);

        let first = match self.poll_to_terminal(run_id).await {
            Ok(PollOutcome::Terminal(run)) => run,
            Ok(PollOutcome::NotFound) => return Ok(Self::not_found_record(key, run_id)),
            Err(e) => {
                let mut record = RunRecord::pending(key, SimulatorIdentity::unknown());
                record.run_id = Some(run_id.to_string());
                record.fail(format!("polling failed: {e}"));
                return Ok(record);
            }
        };

        let mut record = RunRecord::pending(key, first.simulator.clone());
        record.run_id = Some(run_id.to_string());
        self.finish_from_remote(&mut record, &first).await;
        Ok(record)
    }

    fn not_found_record(key: CacheKey, run_id: &str) -> RunRecord {
        // A terminal record, not an error: the owning workflow must not be
        // driven into a retry path by an irrecoverable input.
        let mut record = RunRecord::pending(key, SimulatorIdentity::unknown());
        record.run_id = Some(run_id.to_string());
        record.error = Some(format!("remote run {run_id} not found"));
        record.transition(RunStatus::RunIdNotFound);
        record
    }

    /// Fresh dispatch: download, submit, poll, fetch
    async fn dispatch(
        &self,
        mut record: RunRecord,
        archive: &ArchiveRecord,
        simulator: &SimulatorIdentity,
    ) -> Result<RunRecord> {
        // Archive bytes come from our own object store; failure here is
        // infra, not a simulator problem.
        let bytes = self
            .runner
            .step("download archive", || self.objects.get(&archive.storage_uri))
            .await?;

        record.transition(RunStatus::Submitted);
        self.resolver.publish(&record).await?;

        let request = SubmitRunRequest {
            name: archive.filename.clone(),
            simulator: simulator.id.clone(),
            simulator_version: simulator.version.clone(),
            max_time: self.config.max_sim_time_minutes,
        };

        let submitted = self
            .runner
            .step("submit run", || {
                self.service
                    .submit_run(bytes.clone(), &archive.filename, &request)
            })
            .await;

        let run = match submitted {
            Ok(run) => run,
            Err(e) => {
                warn!(
                    simulator = %simulator.spec_string(),
                    error = %e,
                    "Run submission failed"
                );
                record.fail(format!("submission failed: {e}"));
                return Ok(record);
            }
        };

        info!(
            simulator = %simulator.spec_string(),
            run_id = %run.id,
            "Run submitted"
        );
        record.run_id = Some(run.id.clone());
        record.transition(RunStatus::Polling);
        self.resolver.publish(&record).await?;

        match self.poll_to_terminal(&run.id).await {
            Ok(PollOutcome::Terminal(remote)) => {
                self.finish_from_remote(&mut record, &remote).await;
            }
            Ok(PollOutcome::NotFound) => {
                record.error = Some(format!("remote run {} not found", run.id));
                record.transition(RunStatus::RunIdNotFound);
            }
            Err(e) => {
                record.fail(format!("polling failed: {e}"));
            }
        }

        Ok(record)
    }

    /// Map a terminal remote run into the record, fetching outputs for
    /// runs that produced any
    async fn finish_from_remote(&self, record: &mut RunRecord, remote: &RemoteRun) {
        match remote.status {
            RemoteRunStatus::Succeeded | RemoteRunStatus::Skipped => {
                match self.fetch_output(&remote.id).await {
                    Ok(output) => {
                        record.output = Some(output);
                        record.transition(if remote.status == RemoteRunStatus::Skipped {
                            RunStatus::Skipped
                        } else {
                            RunStatus::Succeeded
                        });
                    }
                    Err(e) => {
                        warn!(run_id = %remote.id, error = %e, "Output retrieval failed");
                        record.fail(format!("output retrieval failed: {e}"));
                    }
                }
            }
            RemoteRunStatus::RunIdNotFound => {
                record.error = Some(format!("remote run {} not found", remote.id));
                record.transition(RunStatus::RunIdNotFound);
            }
            _ => {
                let reason = remote
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("remote run ended {:?}", remote.status));
                record.fail(reason);
            }
        }
    }

    /// Poll the remote run until it reaches a terminal status.
    ///
    /// Transient errors count against a consecutive-error budget; the poll
    /// interval is a suspending wait, never a busy loop.
    async fn poll_to_terminal(&self, run_id: &str) -> Result<PollOutcome> {
        let start = Instant::now();
        let mut consecutive_errors: u32 = 0;

        loop {
            if start.elapsed() >= self.config.max_poll_duration {
                return Err(VerifyError::Timeout(self.config.max_poll_duration));
            }

            match self.service.get_run(run_id).await {
                Ok(run) if run.status.is_terminal() => {
                    debug!(run_id = %run_id, status = ?run.status, "Remote run terminal");
                    return Ok(PollOutcome::Terminal(run));
                }
                Ok(run) => {
                    consecutive_errors = 0;
                    debug!(
                        run_id = %run_id,
                        status = ?run.status,
                        elapsed_secs = start.elapsed().as_secs_f64(),
                        "Remote run still in progress"
                    );
                }
                Err(VerifyError::RunNotFound(_)) if self.config.abort_on_not_found => {
                    // Deliberately not retried: an unknown id stays unknown
                    warn!(run_id = %run_id, "Remote run not found, aborting without retry");
                    return Ok(PollOutcome::NotFound);
                }
                Err(e) if e.is_transient() || matches!(e, VerifyError::RunNotFound(_)) => {
                    consecutive_errors += 1;
                    warn!(
                        run_id = %run_id,
                        error = %e,
                        consecutive_errors,
                        "Status poll failed"
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Fetch the output file and slice labeled dataset rows into
    /// per-observable series.
    async fn fetch_output(&self, run_id: &str) -> Result<ObservableSeries> {
        let metadata = self
            .runner
            .step("fetch output metadata", || {
                self.service.get_output_metadata(run_id)
            })
            .await?;

        let mut observables = ObservableSeries::new();
        for dataset in &metadata.datasets {
            let values = self
                .runner
                .step("fetch output values", || {
                    self.service.get_output_values(run_id, &dataset.name)
                })
                .await?;

            let rows = dataset.labels.len();
            let expected: usize = values.shape.iter().product();
            let well_formed = values.shape.len() == 2
                && values.shape[0] == rows
                && values.values.len() == expected
                && dataset.shape == values.shape;
            if !well_formed {
                warn!(
                    run_id = %run_id,
                    dataset = %dataset.name,
                    shape = ?values.shape,
                    labels = rows,
                    "Skipping malformed output dataset"
                );
                continue;
            }

            let columns = values.shape[1];
            for (row, label) in dataset.labels.iter().enumerate() {
                let series = values.values[row * columns..(row + 1) * columns].to_vec();
                // First dataset defining a label wins
                observables.entry(label.clone()).or_insert(series);
            }
        }

        if observables.is_empty() {
            return Err(VerifyError::validation(format!(
                "run {run_id} produced no usable output datasets"
            )));
        }

        Ok(observables)
    }
}
