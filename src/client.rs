//! HTTP client for the remote simulation services
//!
//! [`RunApiClient`] implements [`SimulationService`] against three HTTP
//! endpoints: the run-execution API (submit/status), the simulation-data
//! API (output datasets), and the simulator catalog. HTTP status codes are
//! mapped onto the error taxonomy here, in one place: 404 is
//! [`VerifyError::RunNotFound`], 5xx is transient, and other 4xx are
//! validation failures - the retry layer keys off that classification.

use crate::api::{
    DatasetValues, OutputMetadata, RemoteRun, RemoteRunStatus, SimulationService,
    SimulatorIdentity, SubmitRunRequest,
};
use crate::error::{Result, VerifyError};
use async_trait::async_trait;
use reqwest::{StatusCode, multipart};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Default run-execution API base URL
pub const DEFAULT_API_BASE_URL: &str = "https://api.biosimulations.org";

/// Default simulation-data API base URL
pub const DEFAULT_DATA_BASE_URL: &str = "https://simdata.api.biosimulations.org";

/// Default simulator catalog base URL
pub const DEFAULT_CATALOG_BASE_URL: &str = "https://api.biosimulators.org";

/// Default per-request timeout
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Endpoint configuration for [`RunApiClient`]
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Run-execution API base URL
    pub api_base_url: String,

    /// Simulation-data API base URL
    pub data_base_url: String,

    /// Simulator catalog base URL
    pub catalog_base_url: String,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            data_base_url: DEFAULT_DATA_BASE_URL.to_string(),
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl ApiConfig {
    /// Config with env overrides applied
    /// (`SIMPARITY_API_BASE_URL`, `SIMPARITY_DATA_BASE_URL`,
    /// `SIMPARITY_CATALOG_BASE_URL`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("SIMPARITY_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var("SIMPARITY_DATA_BASE_URL") {
            config.data_base_url = url;
        }
        if let Ok(url) = std::env::var("SIMPARITY_CATALOG_BASE_URL") {
            config.catalog_base_url = url;
        }
        config
    }

    /// Set the run-execution API base URL
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Set the simulation-data API base URL
    pub fn with_data_base_url(mut self, url: impl Into<String>) -> Self {
        self.data_base_url = url.into();
        self
    }

    /// Set the simulator catalog base URL
    pub fn with_catalog_base_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_base_url = url.into();
        self
    }
}

/// Map a non-success HTTP response onto the error taxonomy
fn classify_status(status: StatusCode, context: &str, body: &str) -> VerifyError {
    if status == StatusCode::NOT_FOUND {
        VerifyError::RunNotFound(context.to_string())
    } else if status.is_server_error() {
        VerifyError::transient(format!("{context}: {status}"))
    } else {
        VerifyError::validation(format!("{context}: {status}: {body}"))
    }
}

/// Run as returned by the run-execution API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    id: String,
    name: String,
    simulator: String,
    simulator_version: String,
    #[serde(default)]
    simulator_digest: String,
    status: RemoteRunStatus,
    #[serde(default)]
    error_message: Option<String>,
}

impl RunResponse {
    fn into_remote_run(self) -> RemoteRun {
        let mut simulator = SimulatorIdentity::unknown();
        simulator.id = self.simulator.clone();
        simulator.name = self.simulator;
        simulator.version = self.simulator_version;
        simulator.image_digest = self.simulator_digest;
        RemoteRun {
            id: self.id,
            name: self.name,
            simulator,
            status: self.status,
            error_message: self.error_message,
        }
    }
}

/// Catalog entry as returned by the simulator catalog API
#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    name: String,
    version: String,
    image: Option<CatalogImage>,
    #[serde(default)]
    created: String,
    #[serde(default)]
    updated: String,
}

#[derive(Debug, Deserialize)]
struct CatalogImage {
    url: String,
    digest: String,
}

/// HTTP implementation of [`SimulationService`]
pub struct RunApiClient {
    config: ApiConfig,
    client: reqwest::Client,
}

impl RunApiClient {
    /// Create a client for the given endpoints
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, context, &body))
    }
}

#[async_trait]
impl SimulationService for RunApiClient {
    async fn submit_run(
        &self,
        archive: Vec<u8>,
        filename: &str,
        request: &SubmitRunRequest,
    ) -> Result<RemoteRun> {
        let url = format!("{}/runs", self.config.api_base_url);

        info!(
            url = %url,
            simulator = %request.simulator,
            version = %request.simulator_version,
            "Submitting run"
        );

        let file_part = multipart::Part::bytes(archive)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")
            .map_err(VerifyError::Http)?;
        let form = multipart::Form::new()
            .part("file", file_part)
            .text("simulationRun", serde_json::to_string(request)?);

        let response = self.client.post(&url).multipart(form).send().await?;
        let response = Self::check(response, "submit run").await?;
        let run: RunResponse = response.json().await?;
        Ok(run.into_remote_run())
    }

    async fn get_run(&self, run_id: &str) -> Result<RemoteRun> {
        let url = format!("{}/runs/{}", self.config.api_base_url, run_id);

        debug!(url = %url, "Fetching run status");

        let response = self.client.get(&url).send().await?;
        let response = Self::check(response, run_id).await?;
        let run: RunResponse = response.json().await?;
        Ok(run.into_remote_run())
    }

    async fn get_output_metadata(&self, run_id: &str) -> Result<OutputMetadata> {
        let url = format!("{}/datasets/{}/metadata", self.config.data_base_url, run_id);

        debug!(url = %url, "Fetching output metadata");

        let response = self.client.get(&url).send().await?;
        let response = Self::check(response, run_id).await?;
        Ok(response.json().await?)
    }

    async fn get_output_values(&self, run_id: &str, dataset_name: &str) -> Result<DatasetValues> {
        let url = format!("{}/datasets/{}/data", self.config.data_base_url, run_id);

        debug!(url = %url, dataset = %dataset_name, "Fetching output values");

        let response = self
            .client
            .get(&url)
            .query(&[("dataset_name", dataset_name)])
            .send()
            .await?;
        let response = Self::check(response, run_id).await?;
        Ok(response.json().await?)
    }

    async fn simulator_catalog(&self) -> Result<Vec<SimulatorIdentity>> {
        let url = format!("{}/simulators", self.config.catalog_base_url);

        debug!(url = %url, "Fetching simulator catalog");

        let response = self
            .client
            .get(&url)
            .query(&[("includeTests", "false")])
            .send()
            .await?;
        let response = Self::check(response, "simulator catalog").await?;
        let entries: Vec<CatalogEntry> = response.json().await?;

        // Entries without a pinned image cannot participate in cache keys
        let identities = entries
            .into_iter()
            .filter_map(|entry| {
                let image = entry.image?;
                Some(SimulatorIdentity {
                    id: entry.id,
                    name: entry.name,
                    version: entry.version,
                    image_url: image.url,
                    image_digest: image.digest,
                    created: entry.created,
                    updated: entry.updated,
                })
            })
            .collect();
        Ok(identities)
    }
}
