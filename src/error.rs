//! Error types for the verification orchestrator

use std::time::Duration;
use thiserror::Error;

/// Verification result type
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Errors that can occur while orchestrating a verification
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Malformed request, rejected before any dispatch
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested simulator could not be resolved against the catalog
    #[error("Simulator {0} not found in catalog")]
    SimulatorNotFound(String),

    /// Remote run id unknown to the simulation service (404-equivalent)
    #[error("Remote run {0} not found")]
    RunNotFound(String),

    /// Transient remote failure (network, 5xx) eligible for retry
    #[error("Transient remote error: {0}")]
    TransientRemote(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// S3 error
    #[error("S3 error: {0}")]
    S3(#[from] aws_sdk_s3::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Object store or record store unavailable (fatal infra error)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Bounded wait expired
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VerifyError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a transient remote error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientRemote(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the retry layer may re-attempt the failed step.
    ///
    /// Not-found is deliberately NOT transient: an unknown run id never
    /// becomes known by retrying, and retrying it would drive the owning
    /// workflow into an infinite-retry path.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientRemote(_) => true,
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(VerifyError::transient("connection reset").is_transient());
        assert!(!VerifyError::RunNotFound("abc123".to_string()).is_transient());
        assert!(!VerifyError::validation("bad request").is_transient());
        assert!(!VerifyError::storage("db down").is_transient());
        assert!(!VerifyError::Timeout(Duration::from_secs(30)).is_transient());
    }

    #[test]
    fn test_helper_constructors() {
        match VerifyError::config("missing bucket") {
            VerifyError::Config(msg) => assert_eq!(msg, "missing bucket"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
