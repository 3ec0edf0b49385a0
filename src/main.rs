//! Simparity - cross-simulator verification CLI
//!
//! Submits a verification against the live remote services and prints the
//! resulting report as JSON.
//!
//! ```bash
//! # Verify an archive across two simulators
//! simparity verify-archive --file model.omex --simulators copasi tellurium
//!
//! # Compare existing remote runs by id
//! simparity verify-runs --run-ids 67817a2e1f52f47f628af971 67817a2eba5a3f02b9f2938d
//! ```
//!
//! Run records are memoized in process memory unless `--s3-bucket` is
//! given, in which case archives go to S3.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use simparity::{
    ApiConfig, ArchiveVerificationRequest, ComparisonSettings, MemoryArchiveCatalog,
    MemoryObjectStore, MemoryRunRecordStore, ObjectStore, RunApiClient, RunsVerificationRequest,
    S3ObjectStore, VerificationConfig, VerificationService, VerificationStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Simparity: cross-simulator verification for deterministic models
#[derive(Parser)]
#[command(name = "simparity")]
#[command(about = "Verify that simulation engines agree on the same model", long_about = None)]
struct Cli {
    /// Run-execution API base URL
    #[arg(long, global = true, env = "SIMPARITY_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Simulation-data API base URL
    #[arg(long, global = true, env = "SIMPARITY_DATA_BASE_URL")]
    data_base_url: Option<String>,

    /// Simulator catalog base URL
    #[arg(long, global = true, env = "SIMPARITY_CATALOG_BASE_URL")]
    catalog_base_url: Option<String>,

    /// S3 bucket for archive storage (in-memory when omitted)
    #[arg(long, global = true, env = "SIMPARITY_S3_BUCKET")]
    s3_bucket: Option<String>,

    /// Status poll interval while waiting (seconds)
    #[arg(long, global = true, default_value = "5")]
    watch_interval: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a model archive across simulators
    VerifyArchive {
        /// Path to the model archive
        #[arg(long)]
        file: PathBuf,

        /// Simulators to compare, as `name` or `name:version`
        #[arg(long, num_args = 1.., required = true)]
        simulators: Vec<String>,

        /// Relative tolerance
        #[arg(long, default_value_t = simparity::compare::DEFAULT_REL_TOL)]
        rel_tol: f64,

        /// Minimum absolute tolerance
        #[arg(long, default_value_t = simparity::compare::DEFAULT_ABS_TOL_MIN)]
        abs_tol_min: f64,

        /// Absolute tolerance scale
        #[arg(long, default_value_t = simparity::compare::DEFAULT_ABS_TOL_SCALE)]
        abs_tol_scale: f64,

        /// Cache-busting token (change to force fresh runs)
        #[arg(long, default_value = "0")]
        cache_buster: String,

        /// Restrict comparison to these observables
        #[arg(long, num_args = 0..)]
        observables: Vec<String>,

        /// Attach raw output values to the report
        #[arg(long)]
        include_outputs: bool,
    },

    /// Compare existing remote runs by id
    VerifyRuns {
        /// Remote run ids
        #[arg(long, num_args = 1.., required = true)]
        run_ids: Vec<String>,

        /// Relative tolerance
        #[arg(long, default_value_t = simparity::compare::DEFAULT_REL_TOL)]
        rel_tol: f64,

        /// Minimum absolute tolerance
        #[arg(long, default_value_t = simparity::compare::DEFAULT_ABS_TOL_MIN)]
        abs_tol_min: f64,

        /// Absolute tolerance scale
        #[arg(long, default_value_t = simparity::compare::DEFAULT_ABS_TOL_SCALE)]
        abs_tol_scale: f64,

        /// Restrict comparison to these observables
        #[arg(long, num_args = 0..)]
        observables: Vec<String>,

        /// Attach raw output values to the report
        #[arg(long)]
        include_outputs: bool,
    },
}

fn settings_from(
    rel_tol: f64,
    abs_tol_min: f64,
    abs_tol_scale: f64,
    observables: Vec<String>,
    include_outputs: bool,
) -> ComparisonSettings {
    let mut settings =
        ComparisonSettings::default().with_tolerances(rel_tol, abs_tol_min, abs_tol_scale);
    if include_outputs {
        settings = settings.with_raw_outputs();
    }
    if !observables.is_empty() {
        settings = settings.with_observable_filter(observables);
    }
    settings
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simparity=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut api_config = ApiConfig::default();
    if let Some(url) = cli.api_base_url {
        api_config = api_config.with_api_base_url(url);
    }
    if let Some(url) = cli.data_base_url {
        api_config = api_config.with_data_base_url(url);
    }
    if let Some(url) = cli.catalog_base_url {
        api_config = api_config.with_catalog_base_url(url);
    }

    let client = Arc::new(RunApiClient::new(api_config)?);

    let objects: Arc<dyn ObjectStore> = match &cli.s3_bucket {
        Some(bucket) => {
            info!(bucket = %bucket, "Using S3 archive storage");
            Arc::new(S3ObjectStore::from_env(bucket).await)
        }
        None => Arc::new(MemoryObjectStore::new()),
    };

    let verifier = Arc::new(VerificationService::new(
        client,
        objects,
        Arc::new(MemoryArchiveCatalog::new()),
        Arc::new(MemoryRunRecordStore::new()),
        VerificationConfig::default(),
    ));

    let workflow_id = match cli.command {
        Commands::VerifyArchive {
            file,
            simulators,
            rel_tol,
            abs_tol_min,
            abs_tol_scale,
            cache_buster,
            observables,
            include_outputs,
        } => {
            let archive = tokio::fs::read(&file).await?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "model.omex".to_string());

            info!(
                file = %file.display(),
                simulators = ?simulators,
                "Submitting archive verification"
            );

            let request = ArchiveVerificationRequest::new(archive, filename, simulators)
                .with_settings(settings_from(
                    rel_tol,
                    abs_tol_min,
                    abs_tol_scale,
                    observables,
                    include_outputs,
                ))
                .with_cache_buster(cache_buster);
            verifier.submit_archive_verification(request).await?
        }
        Commands::VerifyRuns {
            run_ids,
            rel_tol,
            abs_tol_min,
            abs_tol_scale,
            observables,
            include_outputs,
        } => {
            info!(run_ids = ?run_ids, "Submitting run-id verification");

            let request = RunsVerificationRequest::new(run_ids).with_settings(settings_from(
                rel_tol,
                abs_tol_min,
                abs_tol_scale,
                observables,
                include_outputs,
            ));
            verifier.submit_run_id_verification(request).await?
        }
    };

    info!(workflow_id = %workflow_id, "Verification started, waiting for completion");

    let mut stream = verifier
        .watch_status(&workflow_id, Duration::from_secs(cli.watch_interval))
        .await
        .ok_or_else(|| anyhow::anyhow!("workflow {workflow_id} not found"))?;

    let mut last = None;
    while let Some(state) = stream.next().await {
        info!(
            workflow_id = %workflow_id,
            status = ?state.status,
            "Verification status"
        );
        last = Some(state);
    }

    let state = last.ok_or_else(|| anyhow::anyhow!("workflow {workflow_id} yielded no status"))?;
    println!("{}", serde_json::to_string_pretty(&state)?);

    if state.status != VerificationStatus::Completed {
        anyhow::bail!(
            "verification {} ended {:?}: {}",
            workflow_id,
            state.status,
            state.error.unwrap_or_default()
        );
    }

    Ok(())
}
