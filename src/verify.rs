//! Verification orchestration
//!
//! The [`VerificationService`] is the crate's top-level entry point. A
//! verification request fans out one lifecycle task per simulator (or per
//! existing run id), joins their terminal records, and reduces the
//! collected outputs to a [`ComparisonReport`]:
//!
//! ```text
//! request ──► validate + resolve (fail fast)
//!     │
//!     ├── spawn lifecycle task per simulator ──► RunRecord slots
//!     │
//!     ├── join barrier
//!     │
//!     └── Comparison Engine ──► ComparisonReport
//! ```
//!
//! A single simulator failing never aborts the others and never fails the
//! verification: partial results are retained and the report reflects what
//! could be compared. "Simulator failed to produce output" and "outputs
//! disagree" stay distinguishable - the former is a FAILED run record, the
//! latter a disagreeing pair in the report.
//!
//! Status queries return a cloned snapshot of [`VerificationState`], safe
//! to issue repeatedly and concurrently with in-progress mutation.

use crate::api::{SimulationService, SimulatorIdentity};
use crate::cache::{CacheKey, ObservableSeries, RunRecord, cache_key};
use crate::compare::{ComparisonReport, ComparisonSettings, compare};
use crate::content::ContentStore;
use crate::error::{Result, VerifyError};
use crate::lifecycle::{LifecycleConfig, RunLifecycleManager};
use crate::registry::SimulatorRegistry;
use crate::store::{ArchiveCatalog, ObjectStore, RunRecordStore};
use chrono::{DateTime, Utc};
use futures::Stream;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default workflow id prefix for archive verifications
pub const DEFAULT_ARCHIVE_PREFIX: &str = "verify-archive-";

/// Default workflow id prefix for run-id verifications
pub const DEFAULT_RUNS_PREFIX: &str = "verify-runs-";

/// Top-level verification state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Accepted, dispatch not yet begun
    Pending,
    /// Lifecycle tasks in flight
    Running,
    /// All tasks terminal, report attached
    Completed,
    /// The request itself could not be carried out
    Failed,
}

impl VerificationStatus {
    /// Whether this verification will make no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Queryable state of one verification workflow.
///
/// Owned by the orchestrator; individual `run_records` slots are written by
/// their lifecycle tasks, never shared-write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationState {
    /// Workflow identifier returned to the caller
    pub workflow_id: String,

    /// Current state machine position
    pub status: VerificationStatus,

    /// Comparison settings for this verification
    pub settings: ComparisonSettings,

    /// One slot per requested simulator or run id, in request order
    pub run_records: Vec<RunRecord>,

    /// Agreement report, attached when COMPLETED
    pub report: Option<ComparisonReport>,

    /// Request-level error, present when FAILED
    pub error: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl VerificationState {
    fn new(workflow_id: String, settings: ComparisonSettings, run_records: Vec<RunRecord>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            status: VerificationStatus::Pending,
            settings,
            run_records,
            report: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request to verify a model archive across simulators
#[derive(Debug, Clone)]
pub struct ArchiveVerificationRequest {
    /// Archive bytes
    pub archive: Vec<u8>,

    /// Archive filename
    pub filename: String,

    /// Simulator specs, `name` or `name:version`
    pub simulators: Vec<String>,

    /// Comparison settings
    pub settings: ComparisonSettings,

    /// Cache-busting token; change it to force fresh remote runs
    pub cache_buster: String,

    /// Workflow id prefix
    pub workflow_id_prefix: String,
}

impl ArchiveVerificationRequest {
    /// Request with default settings, cache buster "0", and the standard
    /// prefix
    pub fn new(archive: Vec<u8>, filename: impl Into<String>, simulators: Vec<String>) -> Self {
        Self {
            archive,
            filename: filename.into(),
            simulators,
            settings: ComparisonSettings::default(),
            cache_buster: "0".to_string(),
            workflow_id_prefix: DEFAULT_ARCHIVE_PREFIX.to_string(),
        }
    }

    /// Set comparison settings
    pub fn with_settings(mut self, settings: ComparisonSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the cache buster
    pub fn with_cache_buster(mut self, cache_buster: impl Into<String>) -> Self {
        self.cache_buster = cache_buster.into();
        self
    }
}

/// Request to verify existing remote runs against each other
#[derive(Debug, Clone)]
pub struct RunsVerificationRequest {
    /// Remote run ids to compare
    pub run_ids: Vec<String>,

    /// Comparison settings
    pub settings: ComparisonSettings,

    /// Workflow id prefix
    pub workflow_id_prefix: String,
}

impl RunsVerificationRequest {
    /// Request with default settings and the standard prefix
    pub fn new(run_ids: Vec<String>) -> Self {
        Self {
            run_ids,
            settings: ComparisonSettings::default(),
            workflow_id_prefix: DEFAULT_RUNS_PREFIX.to_string(),
        }
    }

    /// Set comparison settings
    pub fn with_settings(mut self, settings: ComparisonSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Orchestrator tuning
#[derive(Debug, Clone, Default)]
pub struct VerificationConfig {
    /// Lifecycle tuning shared by all dispatches
    pub lifecycle: LifecycleConfig,
}

/// Reject run ids that cannot be valid remote identifiers.
///
/// Remote run ids are plain lowercase hex; anything with dashes looks like
/// a locally generated UUID and is rejected before dispatch.
pub fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.is_empty() {
        return Err(VerifyError::validation("run id must not be empty"));
    }
    if run_id.contains('-') {
        return Err(VerifyError::validation(format!(
            "run id {run_id} must not contain dashes, looks like a UUID"
        )));
    }
    Ok(())
}

struct WorkflowEntry {
    state: Arc<RwLock<VerificationState>>,
    supervisor: JoinHandle<()>,
}

/// Top-level verification orchestrator
pub struct VerificationService {
    service: Arc<dyn SimulationService>,
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RunRecordStore>,
    content: ContentStore,
    registry: SimulatorRegistry,
    config: VerificationConfig,
    workflows: Mutex<HashMap<String, WorkflowEntry>>,
}

impl VerificationService {
    /// Create a verification service over the given collaborators
    pub fn new(
        service: Arc<dyn SimulationService>,
        objects: Arc<dyn ObjectStore>,
        archives: Arc<dyn ArchiveCatalog>,
        records: Arc<dyn RunRecordStore>,
        config: VerificationConfig,
    ) -> Self {
        let content = ContentStore::new(objects.clone(), archives);
        let registry = SimulatorRegistry::new(service.clone());
        Self {
            service,
            objects,
            records,
            content,
            registry,
            config,
            workflows: Mutex::new(HashMap::new()),
        }
    }

    /// Submit an archive verification.
    ///
    /// Validation and simulator resolution happen synchronously: an
    /// unresolvable simulator rejects the whole request before any
    /// dispatch. On success the workflow id is returned promptly and the
    /// work proceeds in the background.
    pub async fn submit_archive_verification(
        &self,
        request: ArchiveVerificationRequest,
    ) -> Result<String> {
        if request.archive.is_empty() {
            return Err(VerifyError::validation("archive must not be empty"));
        }
        if request.simulators.is_empty() {
            return Err(VerifyError::validation(
                "at least one simulator must be requested",
            ));
        }

        let archive = self
            .content
            .submit(&request.archive, &request.filename)
            .await?;
        let simulators = self.registry.resolve_all(&request.simulators).await?;

        let workflow_id = format!("{}{}", request.workflow_id_prefix, Uuid::new_v4());
        info!(
            workflow_id = %workflow_id,
            content_hash = %archive.content_hash,
            simulators = simulators.len(),
            "Starting archive verification"
        );

        let slots: Vec<RunRecord> = simulators
            .iter()
            .map(|sim| {
                let key = cache_key(
                    &archive.content_hash,
                    &sim.image_digest,
                    &request.cache_buster,
                );
                RunRecord::pending(key, sim.clone())
            })
            .collect();

        let state = Arc::new(RwLock::new(VerificationState::new(
            workflow_id.clone(),
            request.settings,
            slots,
        )));

        let manager = Arc::new(self.lifecycle_manager(self.config.lifecycle.clone()));
        let cache_buster = request.cache_buster.clone();
        let tasks: Vec<(usize, JoinHandle<Result<RunRecord>>)> = simulators
            .into_iter()
            .enumerate()
            .map(|(index, simulator)| {
                let manager = manager.clone();
                let archive = archive.clone();
                let cache_buster = cache_buster.clone();
                let handle = tokio::spawn(async move {
                    manager.execute(&archive, &simulator, &cache_buster).await
                });
                (index, handle)
            })
            .collect();

        self.launch_supervisor(workflow_id.clone(), state, tasks)
            .await;
        Ok(workflow_id)
    }

    /// Submit a run-id verification.
    ///
    /// Run ids are validated up front; existing runs are polled and
    /// compared without deduplication or cache consultation.
    pub async fn submit_run_id_verification(
        &self,
        request: RunsVerificationRequest,
    ) -> Result<String> {
        if request.run_ids.is_empty() {
            return Err(VerifyError::validation(
                "at least one run id must be provided",
            ));
        }
        for run_id in &request.run_ids {
            validate_run_id(run_id)?;
        }

        let workflow_id = format!("{}{}", request.workflow_id_prefix, Uuid::new_v4());
        info!(
            workflow_id = %workflow_id,
            runs = request.run_ids.len(),
            "Starting run-id verification"
        );

        let slots: Vec<RunRecord> = request
            .run_ids
            .iter()
            .map(|run_id| {
                let mut record = RunRecord::pending(
                    CacheKey::for_run_id(run_id),
                    SimulatorIdentity::unknown(),
                );
                record.run_id = Some(run_id.clone());
                record
            })
            .collect();

        let state = Arc::new(RwLock::new(VerificationState::new(
            workflow_id.clone(),
            request.settings,
            slots,
        )));

        // A request explicitly naming run ids aborts on not-found: an
        // unknown id is an input error, not a transient condition.
        let lifecycle = self.config.lifecycle.clone().with_abort_on_not_found(true);
        let manager = Arc::new(self.lifecycle_manager(lifecycle));
        let tasks: Vec<(usize, JoinHandle<Result<RunRecord>>)> = request
            .run_ids
            .into_iter()
            .enumerate()
            .map(|(index, run_id)| {
                let manager = manager.clone();
                let handle = tokio::spawn(async move { manager.attach(&run_id).await });
                (index, handle)
            })
            .collect();

        self.launch_supervisor(workflow_id.clone(), state, tasks)
            .await;
        Ok(workflow_id)
    }

    /// Snapshot of a workflow's state, or `None` for an unknown id.
    ///
    /// The snapshot is cloned under a read lock: repeated and concurrent
    /// queries never observe a torn write.
    pub async fn get_verification_status(&self, workflow_id: &str) -> Option<VerificationState> {
        let workflows = self.workflows.lock().await;
        let entry = workflows.get(workflow_id)?;
        Some(entry.state.read().await.clone())
    }

    /// Cancel a workflow's supervision.
    ///
    /// Stops the waiting, not the work: already-spawned lifecycle tasks
    /// run to completion in the background so their results still land in
    /// the run record memo for future cache hits. Returns false for
    /// unknown or already-terminal workflows.
    pub async fn cancel(&self, workflow_id: &str) -> bool {
        let workflows = self.workflows.lock().await;
        let Some(entry) = workflows.get(workflow_id) else {
            return false;
        };
        let mut state = entry.state.write().await;
        if state.status.is_terminal() {
            return false;
        }
        entry.supervisor.abort();
        state.status = VerificationStatus::Failed;
        state.error = Some("cancelled".to_string());
        state.updated_at = Utc::now();
        warn!(workflow_id = %workflow_id, "Verification cancelled");
        true
    }

    /// Stream of state snapshots, emitted every `interval` until the
    /// workflow is terminal (the terminal snapshot is the last item).
    /// `None` for an unknown workflow id.
    pub async fn watch_status(
        &self,
        workflow_id: &str,
        interval: Duration,
    ) -> Option<Pin<Box<dyn Stream<Item = VerificationState> + Send>>> {
        let state = {
            let workflows = self.workflows.lock().await;
            workflows.get(workflow_id)?.state.clone()
        };

        Some(Box::pin(async_stream::stream! {
            loop {
                let snapshot = state.read().await.clone();
                let terminal = snapshot.status.is_terminal();
                yield snapshot;
                if terminal {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        }))
    }

    fn lifecycle_manager(&self, config: LifecycleConfig) -> RunLifecycleManager {
        RunLifecycleManager::new(
            self.service.clone(),
            self.objects.clone(),
            crate::cache::CacheKeyResolver::new(self.records.clone()),
            config,
        )
    }

    async fn launch_supervisor(
        &self,
        workflow_id: String,
        state: Arc<RwLock<VerificationState>>,
        tasks: Vec<(usize, JoinHandle<Result<RunRecord>>)>,
    ) {
        let supervisor_state = state.clone();
        let supervisor = tokio::spawn(async move {
            supervise(supervisor_state, tasks).await;
        });

        self.workflows.lock().await.insert(
            workflow_id,
            WorkflowEntry { state, supervisor },
        );
    }
}

/// Join all lifecycle tasks, folding each terminal record into its slot,
/// then attach the comparison report.
async fn supervise(
    state: Arc<RwLock<VerificationState>>,
    tasks: Vec<(usize, JoinHandle<Result<RunRecord>>)>,
) {
    {
        let mut state = state.write().await;
        state.status = VerificationStatus::Running;
        state.updated_at = Utc::now();
    }

    let mut pending: FuturesUnordered<_> = tasks
        .into_iter()
        .map(|(index, handle)| async move { (index, handle.await) })
        .collect();

    let mut infra_error: Option<String> = None;
    while let Some((index, joined)) = pending.next().await {
        let mut state = state.write().await;
        if state.status != VerificationStatus::Running {
            // Cancelled while waiting; the slot stays as it was
            continue;
        }
        match joined {
            Ok(Ok(record)) => {
                state.run_records[index] = record;
            }
            Ok(Err(e)) => {
                // Infra failure: the slot fails and so does the request
                error!(error = %e, "Lifecycle task failed");
                state.run_records[index].fail(e.to_string());
                infra_error.get_or_insert(e.to_string());
            }
            Err(join_error) => {
                error!(error = %join_error, "Lifecycle task panicked");
                state.run_records[index].fail("lifecycle task panicked");
                infra_error.get_or_insert("lifecycle task panicked".to_string());
            }
        }
        state.updated_at = Utc::now();
    }

    let mut state = state.write().await;
    if state.status != VerificationStatus::Running {
        return;
    }

    if let Some(error) = infra_error {
        state.status = VerificationStatus::Failed;
        state.error = Some(error);
        state.updated_at = Utc::now();
        return;
    }

    let outputs = collect_outputs(&state.run_records);
    let report = compare(&outputs, &state.settings);
    info!(
        workflow_id = %state.workflow_id,
        compared = outputs.len(),
        overall_agreement = report.overall_agreement,
        "Verification completed"
    );
    state.report = Some(report);
    state.status = VerificationStatus::Completed;
    state.updated_at = Utc::now();
}

/// Build the comparison input from records that produced output.
///
/// Keys are `name:version`; a duplicate simulator (possible on the run-id
/// path) gets a positional suffix so no output is silently dropped.
fn collect_outputs(records: &[RunRecord]) -> BTreeMap<String, ObservableSeries> {
    let mut outputs = BTreeMap::new();
    for record in records {
        let Some(output) = record.output.as_ref().filter(|o| !o.is_empty()) else {
            continue;
        };
        let base = record.simulator.spec_string();
        let mut key = base.clone();
        let mut n = 1;
        while outputs.contains_key(&key) {
            n += 1;
            key = format!("{base}#{n}");
        }
        outputs.insert(key, output.clone());
    }
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RemoteRunStatus;
    use crate::api::mock::{MockSimulationService, Series, test_sim};
    use crate::cache::RunStatus;
    use crate::retry::RetryPolicy;
    use crate::store::{MemoryArchiveCatalog, MemoryObjectStore, MemoryRunRecordStore};

    struct Fixture {
        service: Arc<MockSimulationService>,
        verifier: Arc<VerificationService>,
    }

    impl Fixture {
        fn new() -> Self {
            let service = Arc::new(MockSimulationService::new());
            let config = VerificationConfig {
                lifecycle: LifecycleConfig::default()
                    .with_poll_interval(Duration::from_millis(1))
                    .with_max_poll_duration(Duration::from_secs(5))
                    .with_retry(RetryPolicy::immediate()),
            };
            let verifier = Arc::new(VerificationService::new(
                service.clone(),
                Arc::new(MemoryObjectStore::new()),
                Arc::new(MemoryArchiveCatalog::new()),
                Arc::new(MemoryRunRecordStore::new()),
                config,
            ));
            Self { service, verifier }
        }

        async fn wait_terminal(&self, workflow_id: &str) -> VerificationState {
            for _ in 0..5000 {
                let state = self
                    .verifier
                    .get_verification_status(workflow_id)
                    .await
                    .expect("workflow should exist");
                if state.status.is_terminal() {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            panic!("workflow {workflow_id} never reached a terminal state");
        }
    }

    fn matching_series() -> Series {
        Series::from([
            ("S1".to_string(), vec![1.0, 2.0, 3.0]),
            ("S2".to_string(), vec![10.0, 20.0, 30.0]),
        ])
    }

    #[tokio::test]
    async fn test_archive_verification_completes_with_agreement() {
        let fx = Fixture::new();
        fx.service.push_simulator(test_sim("copasi", "4.45", "sha256:c"));
        fx.service.push_simulator(test_sim("tellurium", "2.2", "sha256:t"));
        fx.service.set_simulator_output("copasi:4.45", matching_series());
        fx.service.set_simulator_output("tellurium:2.2", matching_series());

        let request = ArchiveVerificationRequest::new(
            b"sbml model".to_vec(),
            "model.omex",
            vec!["copasi".to_string(), "tellurium".to_string()],
        );
        let workflow_id = fx
            .verifier
            .submit_archive_verification(request)
            .await
            .unwrap();
        assert!(workflow_id.starts_with(DEFAULT_ARCHIVE_PREFIX));

        let state = fx.wait_terminal(&workflow_id).await;
        assert_eq!(state.status, VerificationStatus::Completed);
        assert_eq!(state.run_records.len(), 2);
        assert!(state
            .run_records
            .iter()
            .all(|r| r.status == RunStatus::Succeeded));

        let report = state.report.unwrap();
        assert!(report.overall_agreement);
        assert_eq!(report.observables.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_simulator_fails_fast_without_dispatch() {
        let fx = Fixture::new();
        fx.service.push_simulator(test_sim("copasi", "4.45", "sha256:c"));

        let request = ArchiveVerificationRequest::new(
            b"sbml model".to_vec(),
            "model.omex",
            vec!["copasi".to_string(), "does-not-exist".to_string()],
        );
        let result = fx.verifier.submit_archive_verification(request).await;

        assert!(matches!(result, Err(VerifyError::SimulatorNotFound(_))));
        // Rejected before dispatch: nothing was submitted
        assert_eq!(fx.service.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_still_completes() {
        let fx = Fixture::new();
        fx.service.push_simulator(test_sim("copasi", "4.45", "sha256:c"));
        fx.service.push_simulator(test_sim("tellurium", "2.2", "sha256:t"));
        fx.service.push_simulator(test_sim("amici", "0.30", "sha256:a"));
        fx.service.set_simulator_output("copasi:4.45", matching_series());
        fx.service.set_simulator_output("tellurium:2.2", matching_series());
        fx.service.fail_simulator("amici:0.30");

        let request = ArchiveVerificationRequest::new(
            b"sbml model".to_vec(),
            "model.omex",
            vec![
                "copasi".to_string(),
                "tellurium".to_string(),
                "amici".to_string(),
            ],
        );
        let workflow_id = fx
            .verifier
            .submit_archive_verification(request)
            .await
            .unwrap();
        let state = fx.wait_terminal(&workflow_id).await;

        // One FAILED simulator does not fail the verification
        assert_eq!(state.status, VerificationStatus::Completed);
        assert_eq!(state.run_records[0].status, RunStatus::Succeeded);
        assert_eq!(state.run_records[1].status, RunStatus::Succeeded);
        assert_eq!(state.run_records[2].status, RunStatus::Failed);

        // The report compares the two survivors
        let report = state.report.unwrap();
        assert!(report.overall_agreement);
        let s1 = &report.observables["S1"];
        assert_eq!(s1.pairs.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_reuse_across_requests() {
        let fx = Fixture::new();
        fx.service.push_simulator(test_sim("copasi", "4.45", "sha256:c"));
        fx.service.set_simulator_output("copasi:4.45", matching_series());

        let request = ArchiveVerificationRequest::new(
            b"sbml model".to_vec(),
            "model.omex",
            vec!["copasi".to_string()],
        );
        let first = fx
            .verifier
            .submit_archive_verification(request.clone())
            .await
            .unwrap();
        fx.wait_terminal(&first).await;

        let second = fx
            .verifier
            .submit_archive_verification(request)
            .await
            .unwrap();
        let state = fx.wait_terminal(&second).await;

        // Identical (archive, simulator, buster): one remote submission total
        assert_eq!(fx.service.submit_count(), 1);
        assert!(state.run_records[0].reused);
        assert_eq!(state.status, VerificationStatus::Completed);
    }

    #[tokio::test]
    async fn test_cache_buster_isolation_across_requests() {
        let fx = Fixture::new();
        fx.service.push_simulator(test_sim("copasi", "4.45", "sha256:c"));
        fx.service.set_simulator_output("copasi:4.45", matching_series());

        let request = ArchiveVerificationRequest::new(
            b"sbml model".to_vec(),
            "model.omex",
            vec!["copasi".to_string()],
        );
        let first = fx
            .verifier
            .submit_archive_verification(request.clone().with_cache_buster("0"))
            .await
            .unwrap();
        fx.wait_terminal(&first).await;

        let second = fx
            .verifier
            .submit_archive_verification(request.with_cache_buster("1"))
            .await
            .unwrap();
        let state = fx.wait_terminal(&second).await;

        assert_eq!(fx.service.submit_count(), 2);
        assert!(!state.run_records[0].reused);
    }

    #[tokio::test]
    async fn test_run_id_verification_path() {
        let fx = Fixture::new();
        fx.service.register_run(
            "abc123",
            test_sim("copasi", "4.45", "sha256:c"),
            RemoteRunStatus::Succeeded,
            Some(matching_series()),
        );
        fx.service.register_run(
            "def456",
            test_sim("tellurium", "2.2", "sha256:t"),
            RemoteRunStatus::Succeeded,
            Some(matching_series()),
        );

        let request =
            RunsVerificationRequest::new(vec!["abc123".to_string(), "def456".to_string()]);
        let workflow_id = fx
            .verifier
            .submit_run_id_verification(request)
            .await
            .unwrap();
        assert!(workflow_id.starts_with(DEFAULT_RUNS_PREFIX));

        let state = fx.wait_terminal(&workflow_id).await;
        assert_eq!(state.status, VerificationStatus::Completed);
        assert!(state.report.unwrap().overall_agreement);
    }

    #[tokio::test]
    async fn test_run_id_not_found_is_terminal_record_not_failure() {
        let fx = Fixture::new();
        fx.service.register_run(
            "abc123",
            test_sim("copasi", "4.45", "sha256:c"),
            RemoteRunStatus::Succeeded,
            Some(matching_series()),
        );
        fx.service.mark_run_missing("ghost1");

        let request =
            RunsVerificationRequest::new(vec!["abc123".to_string(), "ghost1".to_string()]);
        let workflow_id = fx
            .verifier
            .submit_run_id_verification(request)
            .await
            .unwrap();
        let state = fx.wait_terminal(&workflow_id).await;

        assert_eq!(state.status, VerificationStatus::Completed);
        assert_eq!(state.run_records[0].status, RunStatus::Succeeded);
        assert_eq!(state.run_records[1].status, RunStatus::RunIdNotFound);
    }

    #[tokio::test]
    async fn test_uuid_like_run_id_rejected() {
        let fx = Fixture::new();
        let request = RunsVerificationRequest::new(vec![
            "550e8400-e29b-41d4-a716-446655440000".to_string(),
        ]);
        let result = fx.verifier.submit_run_id_verification(request).await;
        assert!(matches!(result, Err(VerifyError::Validation(_))));
    }

    #[tokio::test]
    async fn test_empty_requests_rejected() {
        let fx = Fixture::new();
        let no_sims =
            ArchiveVerificationRequest::new(b"model".to_vec(), "model.omex", Vec::new());
        assert!(matches!(
            fx.verifier.submit_archive_verification(no_sims).await,
            Err(VerifyError::Validation(_))
        ));

        let no_archive = ArchiveVerificationRequest::new(
            Vec::new(),
            "model.omex",
            vec!["copasi".to_string()],
        );
        assert!(matches!(
            fx.verifier.submit_archive_verification(no_archive).await,
            Err(VerifyError::Validation(_))
        ));

        assert!(matches!(
            fx.verifier
                .submit_run_id_verification(RunsVerificationRequest::new(Vec::new()))
                .await,
            Err(VerifyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_workflow_id_is_none() {
        let fx = Fixture::new();
        assert!(fx.verifier.get_verification_status("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_watch_status_ends_on_terminal_snapshot() {
        let fx = Fixture::new();
        fx.service.push_simulator(test_sim("copasi", "4.45", "sha256:c"));
        fx.service.set_simulator_output("copasi:4.45", matching_series());

        let request = ArchiveVerificationRequest::new(
            b"sbml model".to_vec(),
            "model.omex",
            vec!["copasi".to_string()],
        );
        let workflow_id = fx
            .verifier
            .submit_archive_verification(request)
            .await
            .unwrap();

        let mut stream = fx
            .verifier
            .watch_status(&workflow_id, Duration::from_millis(1))
            .await
            .unwrap();
        let mut last = None;
        while let Some(state) = stream.next().await {
            last = Some(state);
        }
        assert_eq!(last.unwrap().status, VerificationStatus::Completed);
    }
}
