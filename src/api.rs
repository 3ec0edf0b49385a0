//! Remote simulation service interface
//!
//! The orchestrator talks to three remote collaborators: the run-execution
//! API (submit a run, query its status), the simulation-data API (output
//! dataset metadata and values), and the simulator catalog. All three are
//! reached through the [`SimulationService`] trait ONLY - the lifecycle and
//! registry code never touch a concrete client, which keeps them testable
//! against a scripted in-memory service.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A concrete, immutable simulator identity from the catalog.
///
/// `id` is the machine name used in run submissions; `image_digest` pins the
/// exact container build and participates in cache-key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorIdentity {
    /// Machine name, e.g. "copasi"
    pub id: String,

    /// Human-readable display name
    pub name: String,

    /// Version string, e.g. "4.45.296"
    pub version: String,

    /// Container image URL
    pub image_url: String,

    /// Container image digest (pins the exact build)
    pub image_digest: String,

    /// Catalog creation timestamp (opaque feed string)
    pub created: String,

    /// Catalog update timestamp (opaque feed string)
    pub updated: String,
}

impl SimulatorIdentity {
    /// The `name:version` form used in requests and report keys
    pub fn spec_string(&self) -> String {
        format!("{}:{}", self.id, self.version)
    }

    /// Placeholder identity for runs whose simulator is not yet known
    /// (e.g. a not-found run id reported as a terminal record).
    pub fn unknown() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            version: String::new(),
            image_url: String::new(),
            image_digest: String::new(),
            created: String::new(),
            updated: String::new(),
        }
    }
}

/// Status vocabulary of the remote run-execution service.
///
/// Unrecognized values deserialize to [`RemoteRunStatus::Unknown`] rather
/// than failing the whole response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteRunStatus {
    /// Run accepted, not yet queued
    Created,
    /// Run queued for execution
    Queued,
    /// Run executing
    Running,
    /// Outputs being post-processed
    Processing,
    /// Remote service reused a prior result instead of executing
    Skipped,
    /// Run finished and outputs are available
    Succeeded,
    /// Run finished unsuccessfully
    Failed,
    /// Run id unknown to the remote service
    RunIdNotFound,
    /// Unrecognized status value
    #[serde(other)]
    Unknown,
}

impl RemoteRunStatus {
    /// Whether the remote run will make no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Skipped | Self::Succeeded | Self::Failed | Self::RunIdNotFound
        )
    }
}

/// A run as reported by the remote run-execution service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRun {
    /// Remote run id
    pub id: String,

    /// Run name (echoes the submitted archive name)
    pub name: String,

    /// Simulator that executes (or executed) the run
    pub simulator: SimulatorIdentity,

    /// Current remote status
    pub status: RemoteRunStatus,

    /// Remote error message, present when the run failed
    pub error_message: Option<String>,
}

/// Request body for submitting a new run.
///
/// Field names follow the remote API's camelCase wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRunRequest {
    /// Run name, usually the archive filename
    pub name: String,

    /// Simulator machine name
    pub simulator: String,

    /// Simulator version
    pub simulator_version: String,

    /// Maximum simulation wall clock (minutes), enforced remotely
    pub max_time: u32,
}

/// One labeled dataset in a run's output file.
///
/// `shape` is `[rows, columns]`; `labels` names each row, one observable
/// per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMeta {
    /// Dataset name within the output file
    pub name: String,

    /// Dataset shape, row-major
    pub shape: Vec<usize>,

    /// Per-row observable labels
    pub labels: Vec<String>,
}

/// Metadata for a run's output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMetadata {
    /// Datasets contained in the output file
    pub datasets: Vec<DatasetMeta>,
}

/// Raw values of one output dataset, flattened row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetValues {
    /// Dataset shape, row-major
    pub shape: Vec<usize>,

    /// Flattened values, `shape.iter().product()` elements
    pub values: Vec<f64>,
}

/// Remote simulation service seam.
///
/// The lifecycle manager and registry work through this interface ONLY -
/// never concrete clients.
#[async_trait]
pub trait SimulationService: Send + Sync {
    /// Submit a model archive for execution on one simulator.
    ///
    /// Returns the newly created remote run.
    async fn submit_run(
        &self,
        archive: Vec<u8>,
        filename: &str,
        request: &SubmitRunRequest,
    ) -> Result<RemoteRun>;

    /// Fetch the current state of a run by id.
    ///
    /// An unknown id maps to [`crate::error::VerifyError::RunNotFound`],
    /// never to a transport error.
    async fn get_run(&self, run_id: &str) -> Result<RemoteRun>;

    /// Fetch output file metadata for a completed run
    async fn get_output_metadata(&self, run_id: &str) -> Result<OutputMetadata>;

    /// Fetch the values of one dataset by name
    async fn get_output_values(&self, run_id: &str, dataset_name: &str) -> Result<DatasetValues>;

    /// Fetch the full simulator catalog.
    ///
    /// Catalog iteration order is meaningful: later entries are considered
    /// more recent by the registry's bare-name resolution.
    async fn simulator_catalog(&self) -> Result<Vec<SimulatorIdentity>>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory [`SimulationService`] for tests.

    use super::*;
    use crate::error::VerifyError;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::Mutex;

    /// Per-observable time series, as extracted from an output file
    pub type Series = BTreeMap<String, Vec<f64>>;

    /// Build a catalog entry for tests
    pub fn test_sim(id: &str, version: &str, digest: &str) -> SimulatorIdentity {
        SimulatorIdentity {
            id: id.to_string(),
            name: id.to_string(),
            version: version.to_string(),
            image_url: format!("ghcr.io/sims/{id}:{version}"),
            image_digest: digest.to_string(),
            created: "2025-01-01".to_string(),
            updated: "2025-06-01".to_string(),
        }
    }

    struct MockRun {
        simulator: SimulatorIdentity,
        /// get_run calls that still report RUNNING before the final status
        remaining_running: usize,
        final_status: RemoteRunStatus,
        error_message: Option<String>,
        output: Option<Series>,
        status_calls: usize,
    }

    #[derive(Default)]
    struct MockState {
        catalog: Vec<SimulatorIdentity>,
        catalog_fetches: usize,
        fail_next_catalog: usize,
        submit_count: usize,
        fail_next_submits: usize,
        next_run_seq: usize,
        runs: HashMap<String, MockRun>,
        missing_runs: HashSet<String>,
        outputs_by_simulator: HashMap<String, Series>,
        failing_simulators: HashSet<String>,
    }

    /// Scripted simulation service
    #[derive(Default)]
    pub struct MockSimulationService {
        state: Mutex<MockState>,
    }

    impl MockSimulationService {
        pub fn new() -> Self {
            Self::default()
        }

        /// Append a catalog entry (order matters for bare-name resolution)
        pub fn push_simulator(&self, sim: SimulatorIdentity) {
            self.state.lock().unwrap().catalog.push(sim);
        }

        /// Output that submitted runs of `spec` ("name:version") will produce
        pub fn set_simulator_output(&self, spec: &str, output: Series) {
            self.state
                .lock()
                .unwrap()
                .outputs_by_simulator
                .insert(spec.to_string(), output);
        }

        /// Submitted runs of `spec` terminate FAILED
        pub fn fail_simulator(&self, spec: &str) {
            self.state
                .lock()
                .unwrap()
                .failing_simulators
                .insert(spec.to_string());
        }

        /// Register a pre-existing run for the run-id verification path
        pub fn register_run(
            &self,
            run_id: &str,
            simulator: SimulatorIdentity,
            status: RemoteRunStatus,
            output: Option<Series>,
        ) {
            self.state.lock().unwrap().runs.insert(
                run_id.to_string(),
                MockRun {
                    simulator,
                    remaining_running: 0,
                    final_status: status,
                    error_message: None,
                    output,
                    status_calls: 0,
                },
            );
        }

        /// Make `run_id` answer not-found
        pub fn mark_run_missing(&self, run_id: &str) {
            self.state
                .lock()
                .unwrap()
                .missing_runs
                .insert(run_id.to_string());
        }

        /// Next `n` submissions fail with a transient error
        pub fn fail_next_submits(&self, n: usize) {
            self.state.lock().unwrap().fail_next_submits = n;
        }

        /// Next `n` catalog fetches fail with a transient error
        pub fn fail_next_catalog(&self, n: usize) {
            self.state.lock().unwrap().fail_next_catalog = n;
        }

        pub fn submit_count(&self) -> usize {
            self.state.lock().unwrap().submit_count
        }

        pub fn catalog_fetches(&self) -> usize {
            self.state.lock().unwrap().catalog_fetches
        }

        /// How many times get_run was called for `run_id`
        pub fn status_calls(&self, run_id: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .runs
                .get(run_id)
                .map_or(0, |r| r.status_calls)
        }
    }

    #[async_trait]
    impl SimulationService for MockSimulationService {
        async fn submit_run(
            &self,
            _archive: Vec<u8>,
            _filename: &str,
            request: &SubmitRunRequest,
        ) -> Result<RemoteRun> {
            let mut state = self.state.lock().unwrap();
            state.submit_count += 1;
            if state.fail_next_submits > 0 {
                state.fail_next_submits -= 1;
                return Err(VerifyError::transient("mock: submission refused"));
            }
            let spec = format!("{}:{}", request.simulator, request.simulator_version);
            let simulator = state
                .catalog
                .iter()
                .find(|s| s.spec_string() == spec)
                .cloned()
                .unwrap_or_else(|| {
                    let mut sim = SimulatorIdentity::unknown();
                    sim.id = request.simulator.clone();
                    sim.name = request.simulator.clone();
                    sim.version = request.simulator_version.clone();
                    sim
                });
            state.next_run_seq += 1;
            let run_id = format!("mockrun{:04}", state.next_run_seq);
            let failing = state.failing_simulators.contains(&spec);
            let output = state.outputs_by_simulator.get(&spec).cloned();
            state.runs.insert(
                run_id.clone(),
                MockRun {
                    simulator: simulator.clone(),
                    remaining_running: 1,
                    final_status: if failing {
                        RemoteRunStatus::Failed
                    } else {
                        RemoteRunStatus::Succeeded
                    },
                    error_message: failing.then(|| "mock: simulator crashed".to_string()),
                    output,
                    status_calls: 0,
                },
            );
            Ok(RemoteRun {
                id: run_id,
                name: request.name.clone(),
                simulator,
                status: RemoteRunStatus::Created,
                error_message: None,
            })
        }

        async fn get_run(&self, run_id: &str) -> Result<RemoteRun> {
            let mut state = self.state.lock().unwrap();
            if state.missing_runs.contains(run_id) {
                return Err(VerifyError::RunNotFound(run_id.to_string()));
            }
            let run = state
                .runs
                .get_mut(run_id)
                .ok_or_else(|| VerifyError::RunNotFound(run_id.to_string()))?;
            run.status_calls += 1;
            let status = if run.remaining_running > 0 {
                run.remaining_running -= 1;
                RemoteRunStatus::Running
            } else {
                run.final_status
            };
            Ok(RemoteRun {
                id: run_id.to_string(),
                name: "mock".to_string(),
                simulator: run.simulator.clone(),
                status,
                error_message: run.error_message.clone(),
            })
        }

        async fn get_output_metadata(&self, run_id: &str) -> Result<OutputMetadata> {
            let state = self.state.lock().unwrap();
            let run = state
                .runs
                .get(run_id)
                .ok_or_else(|| VerifyError::RunNotFound(run_id.to_string()))?;
            let series = run
                .output
                .as_ref()
                .ok_or_else(|| VerifyError::transient("mock: output not ready"))?;
            let labels: Vec<String> = series.keys().cloned().collect();
            let columns = series.values().next().map_or(0, Vec::len);
            Ok(OutputMetadata {
                datasets: vec![DatasetMeta {
                    name: "report".to_string(),
                    shape: vec![labels.len(), columns],
                    labels,
                }],
            })
        }

        async fn get_output_values(&self, run_id: &str, dataset_name: &str) -> Result<DatasetValues> {
            let state = self.state.lock().unwrap();
            let run = state
                .runs
                .get(run_id)
                .ok_or_else(|| VerifyError::RunNotFound(run_id.to_string()))?;
            let series = run
                .output
                .as_ref()
                .ok_or_else(|| VerifyError::transient("mock: output not ready"))?;
            if dataset_name != "report" {
                return Err(VerifyError::validation(format!(
                    "mock: unknown dataset {dataset_name}"
                )));
            }
            let columns = series.values().next().map_or(0, Vec::len);
            let values: Vec<f64> = series.values().flatten().copied().collect();
            Ok(DatasetValues {
                shape: vec![series.len(), columns],
                values,
            })
        }

        async fn simulator_catalog(&self) -> Result<Vec<SimulatorIdentity>> {
            let mut state = self.state.lock().unwrap();
            if state.fail_next_catalog > 0 {
                state.fail_next_catalog -= 1;
                return Err(VerifyError::transient("mock: catalog unavailable"));
            }
            state.catalog_fetches += 1;
            Ok(state.catalog.clone())
        }
    }
}
