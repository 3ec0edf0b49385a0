//! Simulator catalog resolution
//!
//! Resolves human-given `name` or `name:version` strings to concrete
//! [`SimulatorIdentity`] entries. The upstream catalog is read-mostly and
//! slow to fetch, so it is cached with a bounded TTL; a refresh failure
//! falls back to the last known-good catalog rather than failing
//! resolution outright.
//!
//! ## Bare-name resolution quirk
//!
//! Resolving a name without a version keeps the LAST matching entry in
//! catalog iteration order, not the first. Catalog ordering encodes
//! recency, so last-match means "most recent wins". This is a documented,
//! load-bearing behavior - tested explicitly, not to be "fixed" into
//! semver-latest logic.

use crate::api::{SimulationService, SimulatorIdentity};
use crate::error::{Result, VerifyError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default catalog cache TTL (1 hour)
pub const DEFAULT_CATALOG_TTL_SECS: u64 = 3600;

/// Injectable time source, so TTL expiry is deterministic in tests
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall-clock [`Clock`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Split a `name` or `name:version` spec
pub fn parse_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once(':') {
        Some((name, version)) => (name, Some(version)),
        None => (spec, None),
    }
}

struct CachedCatalog {
    fetched_at: Instant,
    entries: Vec<SimulatorIdentity>,
}

/// TTL-cached view of the simulator catalog
pub struct SimulatorRegistry {
    service: Arc<dyn SimulationService>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cached: RwLock<Option<CachedCatalog>>,
}

impl SimulatorRegistry {
    /// Create a registry with the default TTL and wall clock
    pub fn new(service: Arc<dyn SimulationService>) -> Self {
        Self::with_clock(service, Arc::new(SystemClock))
    }

    /// Create a registry with an injected clock
    pub fn with_clock(service: Arc<dyn SimulationService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            service,
            clock,
            ttl: Duration::from_secs(DEFAULT_CATALOG_TTL_SECS),
            cached: RwLock::new(None),
        }
    }

    /// Set the cache TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Current catalog, served from cache while fresh.
    ///
    /// A failed refresh falls back to the stale catalog when one exists.
    pub async fn catalog(&self) -> Result<Vec<SimulatorIdentity>> {
        {
            let cached = self.cached.read().await;
            if let Some(c) = cached.as_ref() {
                if self.clock.now().duration_since(c.fetched_at) < self.ttl {
                    return Ok(c.entries.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another waiter may have refreshed while we queued for the lock
        if let Some(c) = cached.as_ref() {
            if self.clock.now().duration_since(c.fetched_at) < self.ttl {
                return Ok(c.entries.clone());
            }
        }

        match self.service.simulator_catalog().await {
            Ok(entries) => {
                info!(entries = entries.len(), "Refreshed simulator catalog");
                *cached = Some(CachedCatalog {
                    fetched_at: self.clock.now(),
                    entries: entries.clone(),
                });
                Ok(entries)
            }
            Err(e) => match cached.as_ref() {
                Some(stale) => {
                    warn!(error = %e, "Catalog refresh failed, serving stale catalog");
                    Ok(stale.entries.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Resolve a `name` or `name:version` spec to a catalog entry.
    ///
    /// With a version: exact match on both fields. Without: last match in
    /// catalog order wins (see module docs).
    pub async fn resolve(&self, spec: &str) -> Result<SimulatorIdentity> {
        let (name, version) = parse_spec(spec);
        let catalog = self.catalog().await?;

        let mut resolved: Option<SimulatorIdentity> = None;
        for entry in &catalog {
            let matched = match version {
                Some(v) => entry.id == name && entry.version == v,
                None => entry.id == name,
            };
            if matched {
                // No break: the last matching entry wins
                resolved = Some(entry.clone());
                if version.is_some() {
                    break;
                }
            }
        }

        match resolved {
            Some(identity) => {
                debug!(spec = %spec, resolved = %identity.spec_string(), "Resolved simulator");
                Ok(identity)
            }
            None => Err(VerifyError::SimulatorNotFound(spec.to_string())),
        }
    }

    /// Resolve every spec or fail on the first unresolvable one.
    ///
    /// Used by the orchestrator's fail-fast validation: a request naming an
    /// unknown simulator is rejected before any dispatch.
    pub async fn resolve_all(&self, specs: &[String]) -> Result<Vec<SimulatorIdentity>> {
        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            resolved.push(self.resolve(spec).await?);
        }
        Ok(resolved)
    }
}
