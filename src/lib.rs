//! # Simparity
//!
//! Cross-simulator verification orchestration: run the same deterministic
//! model on several simulation engines and report whether their outputs
//! agree numerically.
//!
//! ## Architecture
//!
//! ```text
//! VerificationService (verify.rs)        Remote services (HTTP)
//! ├── ContentStore          ←──────────  object storage (S3 / memory)
//! ├── SimulatorRegistry     ←──────────  simulator catalog (TTL cached)
//! ├── RunLifecycleManager  ──────────►  run-execution + data APIs
//! │     └── CacheKeyResolver ←────────  run record memo store
//! └── Comparison Engine (compare.rs)
//! ```
//!
//! Each verification fans out one lifecycle task per simulator. The cache
//! key (archive content hash, simulator image digest, cache buster) makes
//! repeated requests for an unchanged combination reuse prior results
//! instead of re-executing expensive simulations. A failing simulator is
//! recorded, not fatal: the verification completes with partial results
//! and the report distinguishes "failed to produce output" from "outputs
//! disagree".

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod cache;
pub mod client;
pub mod compare;
pub mod content;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod retry;
pub mod s3;
pub mod store;
pub mod verify;

// ============================================================================
// Public exports - Verification orchestration
// ============================================================================

pub use verify::{
    ArchiveVerificationRequest, RunsVerificationRequest, VerificationConfig, VerificationService,
    VerificationState, VerificationStatus, validate_run_id,
};

// Comparison engine
pub use compare::{
    ComparisonReport, ComparisonSettings, ObservableReport, PairComparison, compare, values_agree,
};

// Run lifecycle
pub use lifecycle::{LifecycleConfig, RunLifecycleManager};

// Cache key resolution
pub use cache::{CacheKey, CacheKeyResolver, ObservableSeries, RunRecord, RunStatus, cache_key};

// ============================================================================
// Public exports - Collaborator seams
// ============================================================================

// Error handling
pub use error::{Result, VerifyError};

// Remote simulation service
pub use api::{
    DatasetMeta, DatasetValues, OutputMetadata, RemoteRun, RemoteRunStatus, SimulationService,
    SimulatorIdentity, SubmitRunRequest,
};
pub use client::{ApiConfig, RunApiClient};

// Content-addressed archive storage
pub use content::{ArchiveRecord, ContentStore, hash_bytes};

// Simulator catalog
pub use registry::{Clock, SimulatorRegistry, SystemClock, parse_spec};

// Retry substrate
pub use retry::{RetryPolicy, StepRunner};

// Storage backends
pub use s3::S3ObjectStore;
pub use store::{
    ArchiveCatalog, MemoryArchiveCatalog, MemoryObjectStore, MemoryRunRecordStore, ObjectStore,
    RunRecordStore,
};
