//! Endpoint monitoring: probe every address of an endpoint, classify the
//! outcome and append one history row per address.
//!
//! Probe and parse failures are recorded as `ERROR` rows so outages stay
//! queryable. Only a failed append is reported to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::classify::classify;
use crate::db::{DbError, EntityType, IpRole, PingResult, PingResultStore, ProbeTarget};
use crate::probe::{Normalizer, ProbeExecutor, ProbeMeasurement, PROBE_OVERHEAD};
use crate::profile::{MediaKind, MediaProfile, ProfileTable};

/// Hard stop for an executor that ignores its own budget.
const PROBE_GRACE: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("failed to persist result for {address}: {source}")]
    Persist {
        address: String,
        #[source]
        source: DbError,
    },
    #[error("monitor task failed: {0}")]
    Task(String),
}

/// Registry snapshot of one monitored entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub entity_type: EntityType,
    pub entity_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    pub primary_ip: String,
    #[serde(default)]
    pub backup_ip: Option<String>,
    #[serde(default = "unknown_media", deserialize_with = "lenient_media")]
    pub network_media: MediaKind,
    #[serde(default)]
    pub network_vendor: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn unknown_media() -> MediaKind {
    MediaKind::Unknown
}

fn enabled_by_default() -> bool {
    true
}

fn lenient_media<'de, D>(deserializer: D) -> Result<MediaKind, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .as_deref()
        .map(MediaKind::parse_lenient)
        .unwrap_or(MediaKind::Unknown))
}

impl Endpoint {
    /// Addresses to probe, primary first. A blank backup counts as none.
    pub fn addresses(&self) -> Vec<(IpRole, &str)> {
        let mut addresses = vec![(IpRole::Primary, self.primary_ip.trim())];
        if let Some(backup) = self.backup_ip.as_deref().map(str::trim) {
            if !backup.is_empty() {
                addresses.push((IpRole::Backup, backup));
            }
        }
        addresses
    }

    fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} {} ({})", self.entity_type, self.entity_id, name),
            None => format!("{} {}", self.entity_type, self.entity_id),
        }
    }
}

/// Runs probe cycles for endpoints. Cheap to clone; holds no per-call state.
#[derive(Clone)]
pub struct EndpointMonitor {
    executor: Arc<dyn ProbeExecutor>,
    normalizer: Arc<Normalizer>,
    profiles: Arc<ProfileTable>,
    store: Arc<dyn PingResultStore>,
}

impl EndpointMonitor {
    pub fn new(
        executor: Arc<dyn ProbeExecutor>,
        profiles: Arc<ProfileTable>,
        store: Arc<dyn PingResultStore>,
    ) -> Self {
        Self {
            executor,
            normalizer: Arc::new(Normalizer::default()),
            profiles,
            store,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    /// Probe each configured address in order and persist one row per address.
    ///
    /// A disabled endpoint returns no rows and touches nothing. If an append
    /// fails the remaining addresses are still probed and persisted, then the
    /// first failure is returned.
    pub async fn monitor_endpoint(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Vec<PingResult>, MonitorError> {
        if !endpoint.enabled {
            tracing::debug!("Monitor: {} is disabled, skipping", endpoint.label());
            return Ok(Vec::new());
        }

        let profile = self.profiles.resolve(endpoint.network_media);
        let addresses = endpoint.addresses();
        let mut results = Vec::with_capacity(addresses.len());
        let mut first_error = None;

        for (role, address) in addresses {
            let target = ProbeTarget {
                entity_type: endpoint.entity_type,
                entity_id: endpoint.entity_id,
                ip_address: address,
                ip_role: role,
                network_media: endpoint.network_media,
                network_vendor: endpoint.network_vendor.as_deref(),
            };

            let mut row = self.check_address(&target, profile).await;

            match self.store.insert(&row) {
                Ok(id) => {
                    row.id = id;
                    tracing::debug!(
                        "Monitor: {} {} {} is {}",
                        endpoint.label(),
                        role.as_str(),
                        address,
                        row.status
                    );
                    results.push(row);
                }
                Err(e) => {
                    tracing::error!(
                        "Monitor: failed to persist result for {} {}: {}",
                        endpoint.label(),
                        address,
                        e
                    );
                    if first_error.is_none() {
                        first_error = Some(MonitorError::Persist {
                            address: address.to_string(),
                            source: e,
                        });
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// Run independent endpoint checks concurrently, at most `max_in_flight`
    /// at a time. Results come back in input order.
    pub async fn monitor_batch(
        &self,
        endpoints: Vec<Endpoint>,
        max_in_flight: usize,
    ) -> Vec<Result<Vec<PingResult>, MonitorError>> {
        let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
        let mut handles = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let monitor = self.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| MonitorError::Task(e.to_string()))?;
                monitor.monitor_endpoint(&endpoint).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(MonitorError::Task(e.to_string())),
            });
        }
        results
    }

    /// Probe one address and build its row. Never fails: problems become data.
    async fn check_address(&self, target: &ProbeTarget<'_>, profile: &MediaProfile) -> PingResult {
        let limit = profile.probe_budget() + PROBE_OVERHEAD + PROBE_GRACE;
        let probe = self.executor.probe(target.ip_address, profile);

        let outcome = match tokio::time::timeout(limit, probe).await {
            Ok(Ok(raw)) => self.normalizer.normalize(&raw).map_err(|e| {
                tracing::warn!("Monitor: could not read probe of {}: {}", target.ip_address, e);
                e.to_string()
            }),
            Ok(Err(e)) => {
                tracing::warn!("Monitor: probe of {} failed: {}", target.ip_address, e);
                Err(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    "Monitor: probe of {} overran {:?}, recording as no replies",
                    target.ip_address,
                    limit
                );
                Ok(ProbeMeasurement::from_samples(profile.probe_count, &[]))
            }
        };

        let checked_at = Utc::now();
        match outcome {
            Ok(measurement) => {
                let status = classify(&measurement, profile);
                PingResult::measured(target, &measurement, status, checked_at)
            }
            Err(message) => PingResult::failed(target, message, checked_at),
        }
    }
}
