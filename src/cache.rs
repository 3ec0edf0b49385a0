//! Cache keys and run record memoization
//!
//! A run is identified by the triple (archive content hash, simulator image
//! digest, cache buster). The derived [`CacheKey`] is the system's one
//! correctness-relevant idempotence handle: a prior SUCCEEDED [`RunRecord`]
//! under the same key is always reused instead of re-executing the remote
//! simulation.
//!
//! Concurrent requests computing the same uncached key are serialized by a
//! compare-and-swap insert: the first writer of the pending record wins and
//! performs the dispatch; later claimants read back the winning record and
//! wait for it to reach a terminal state.

use crate::api::SimulatorIdentity;
use crate::error::{Result, VerifyError};
use crate::store::RunRecordStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Deterministic identifier for one (archive, simulator image, buster) run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key text (sha256 hex)
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key for a run attached by id rather than dispatched from an archive.
    ///
    /// These records are request-local and never consulted for reuse, but
    /// every record carries a key so the store stays uniformly keyed.
    pub fn for_run_id(run_id: &str) -> Self {
        Self(hash_fields(&["run", run_id]))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fields.join("|").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derive the cache key for a dispatch.
///
/// Identical inputs always yield the identical key; changing any one field
/// (including only the cache buster) yields a different key.
pub fn cache_key(content_hash: &str, image_digest: &str, cache_buster: &str) -> CacheKey {
    CacheKey(hash_fields(&[content_hash, image_digest, cache_buster]))
}

/// Dispatch state machine for one simulator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Created, remote submission not yet attempted
    NotStarted,
    /// Remote submission in flight
    Submitted,
    /// Remote run accepted, polling for completion
    Polling,
    /// Remote run finished and outputs were extracted
    Succeeded,
    /// Remote run failed, or retry/poll budget exhausted
    Failed,
    /// Remote service does not know the run id; never retried
    RunIdNotFound,
    /// Remote service reused a prior result instead of executing
    Skipped,
}

impl RunStatus {
    /// Whether this record will make no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::RunIdNotFound | Self::Skipped
        )
    }
}

/// Per-observable time series extracted from a run's output file
pub type ObservableSeries = BTreeMap<String, Vec<f64>>;

/// One simulator dispatch and its outcome.
///
/// Mutated only by the lifecycle manager that owns it; immutable once
/// `status` is terminal. Archive-path records are retained in the record
/// store as durable memos for future requests sharing the cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Remote run id, present once submission succeeded
    pub run_id: Option<String>,

    /// Memoization key for this dispatch
    pub cache_key: CacheKey,

    /// Simulator this record belongs to
    pub simulator: SimulatorIdentity,

    /// Dispatch state
    pub status: RunStatus,

    /// Extracted output, present for runs that produced a usable dataset
    pub output: Option<ObservableSeries>,

    /// Terminal error description, present for FAILED records
    pub error: Option<String>,

    /// Whether this record was satisfied from the cache instead of a fresh
    /// remote dispatch
    pub reused: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// A fresh, not-yet-dispatched record
    pub fn pending(cache_key: CacheKey, simulator: SimulatorIdentity) -> Self {
        let now = Utc::now();
        Self {
            run_id: None,
            cache_key,
            simulator,
            status: RunStatus::NotStarted,
            output: None,
            error: None,
            reused: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new status, refreshing `updated_at`
    pub fn transition(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Terminal FAILED transition with an error description
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.transition(RunStatus::Failed);
    }

    /// Whether comparison can use this record
    pub fn has_output(&self) -> bool {
        self.output.as_ref().is_some_and(|o| !o.is_empty())
    }
}

/// Outcome of claiming a cache key for dispatch
#[derive(Debug)]
pub enum Claim {
    /// No prior record existed; the caller owns the dispatch
    Owned,
    /// A prior SUCCEEDED record exists and must be reused
    Reusable(RunRecord),
    /// Another dispatch is in flight for this key; wait for it
    InFlight(RunRecord),
    /// A prior record exists but is terminal and not reusable; the caller
    /// took the slot over and owns a fresh dispatch
    TakenOver,
}

/// Cache key resolution against the run record store
#[derive(Clone)]
pub struct CacheKeyResolver {
    records: Arc<dyn RunRecordStore>,
}

impl CacheKeyResolver {
    /// Create a resolver over the given record store
    pub fn new(records: Arc<dyn RunRecordStore>) -> Self {
        Self { records }
    }

    /// Look up a reusable record: only SUCCEEDED memos satisfy reuse
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<RunRecord>> {
        Ok(self
            .records
            .find(key)
            .await?
            .filter(|r| r.status == RunStatus::Succeeded))
    }

    /// Claim `pending.cache_key` for dispatch (first writer wins).
    ///
    /// Exactly one concurrent claimant gets [`Claim::Owned`]; the others see
    /// the winner's record. Terminal non-SUCCEEDED records do not satisfy
    /// reuse, so a new claimant overwrites them and dispatches fresh.
    pub async fn claim(&self, pending: RunRecord) -> Result<Claim> {
        match self.records.try_insert(pending.clone()).await? {
            None => Ok(Claim::Owned),
            Some(existing) if existing.status == RunStatus::Succeeded => {
                debug!(cache_key = %existing.cache_key, "Reusing cached run record");
                Ok(Claim::Reusable(existing))
            }
            Some(existing) if !existing.status.is_terminal() => Ok(Claim::InFlight(existing)),
            Some(existing) => {
                warn!(
                    cache_key = %existing.cache_key,
                    status = ?existing.status,
                    "Cached record is terminal but not reusable, dispatching fresh"
                );
                self.records.update(pending).await?;
                Ok(Claim::TakenOver)
            }
        }
    }

    /// Publish a record mutation (keyed, last-writer-safe)
    pub async fn publish(&self, record: &RunRecord) -> Result<()> {
        self.records.update(record.clone()).await
    }

    /// Wait for another claimant's in-flight record to reach a terminal
    /// state, polling the record store.
    ///
    /// A winner that never terminates (e.g. crashed mid-dispatch) degrades
    /// to a timeout for the waiter, never an unbounded block.
    pub async fn await_terminal(
        &self,
        key: &CacheKey,
        poll_interval: Duration,
        budget: Duration,
    ) -> Result<RunRecord> {
        let start = Instant::now();
        loop {
            if start.elapsed() >= budget {
                return Err(VerifyError::Timeout(budget));
            }
            match self.records.find(key).await? {
                Some(record) if record.status.is_terminal() => return Ok(record),
                Some(_) => {
                    debug!(cache_key = %key, "Waiting on in-flight run for shared cache key");
                }
                // The winner vanished; nothing to wait on.
                None => return Err(VerifyError::storage("in-flight run record disappeared")),
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
