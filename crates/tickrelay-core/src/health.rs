//! Per-backend liveness report.
//!
//! Every probe runs in its own task with its own deadline, so a backend that hangs, errors
//! or panics only affects its own entry.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::data_source::{DataSource, SourceError};
use crate::routing::SourceRouter;
use crate::ProviderId;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unreachable { reason: String },
}

impl HealthStatus {
    /// A throttled backend answered, so it counts as healthy.
    fn from_probe(outcome: Result<bool, SourceError>) -> Self {
        match outcome {
            Ok(true) | Err(SourceError::RateLimited { .. }) => Self::Healthy,
            Ok(false) => Self::Unhealthy,
            Err(error) => Self::Unreachable {
                reason: error.to_string(),
            },
        }
    }

    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthEntry {
    pub provider: ProviderId,
    pub priority: i32,
    #[serde(flatten)]
    pub status: HealthStatus,
}

/// Probe results in router priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub entries: Vec<HealthEntry>,
}

impl HealthReport {
    pub fn status_of(&self, provider: &ProviderId) -> Option<&HealthStatus> {
        self.entries
            .iter()
            .find(|entry| entry.provider == *provider)
            .map(|entry| &entry.status)
    }

    pub fn healthy_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status.is_healthy())
            .count()
    }

    pub fn all_healthy(&self) -> bool {
        !self.entries.is_empty() && self.healthy_count() == self.entries.len()
    }
}

pub struct HealthAggregator {
    sources: Vec<(ProviderId, i32, Arc<dyn DataSource>)>,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(router: &SourceRouter) -> Self {
        let sources = router
            .sources()
            .iter()
            .map(|entry| {
                (
                    entry.id().clone(),
                    entry.priority(),
                    Arc::clone(entry.source()),
                )
            })
            .collect();
        Self {
            sources,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Probes all backends concurrently. Must be called inside a Tokio runtime.
    pub async fn check(&self) -> HealthReport {
        let probe_timeout = self.probe_timeout;
        let handles: Vec<_> = self
            .sources
            .iter()
            .map(|(_, _, source)| {
                let source = Arc::clone(source);
                tokio::spawn(async move {
                    tokio::time::timeout(probe_timeout, source.health_check()).await
                })
            })
            .collect();

        let mut entries = Vec::with_capacity(handles.len());
        for ((provider, priority, _), handle) in self.sources.iter().zip(handles) {
            let status = match handle.await {
                Ok(Ok(outcome)) => HealthStatus::from_probe(outcome),
                Ok(Err(_elapsed)) => HealthStatus::Unreachable {
                    reason: format!("probe timed out after {}ms", probe_timeout.as_millis()),
                },
                Err(join_error) => {
                    warn!(provider = %provider, error = %join_error, "health probe aborted");
                    HealthStatus::Unreachable {
                        reason: format!("probe aborted: {join_error}"),
                    }
                }
            };
            debug!(provider = %provider, ?status, "health probe finished");
            entries.push(HealthEntry {
                provider: provider.clone(),
                priority: *priority,
                status,
            });
        }

        HealthReport { entries }
    }
}
