//! Per-backend request counters and latency summaries.
//!
//! The router records one outcome per adapter call. Successful calls contribute their
//! latency; the last [`LATENCY_WINDOW`] of those feed the p95 figure.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::data_source::SourceError;
use crate::{ProviderId, UtcDateTime};

/// Number of recent successful latencies kept for the percentile.
pub const LATENCY_WINDOW: usize = 100;

/// Snapshot of one backend's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMetrics {
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    /// Percentage of successful calls; 100 before the first call.
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<UtcDateTime>,
}

impl Default for ProviderMetrics {
    fn default() -> Self {
        Tally::default().snapshot()
    }
}

#[derive(Debug, Default)]
struct Tally {
    requests: u64,
    successes: u64,
    errors: u64,
    total_latency_ms: u64,
    recent_latencies: VecDeque<u64>,
    last_error: Option<String>,
    last_error_at: Option<UtcDateTime>,
}

impl Tally {
    fn snapshot(&self) -> ProviderMetrics {
        let success_rate = if self.requests == 0 {
            100.0
        } else {
            self.successes as f64 / self.requests as f64 * 100.0
        };
        let avg_latency_ms = if self.successes == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.successes as f64
        };

        ProviderMetrics {
            requests: self.requests,
            successes: self.successes,
            errors: self.errors,
            success_rate,
            avg_latency_ms,
            p95_latency_ms: p95(&self.recent_latencies),
            last_error: self.last_error.clone(),
            last_error_at: self.last_error_at,
        }
    }
}

fn p95(latencies: &VecDeque<u64>) -> u64 {
    if latencies.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = latencies.iter().copied().collect();
    sorted.sort_unstable();
    let index = (sorted.len() * 95 / 100).min(sorted.len() - 1);
    sorted[index]
}

/// Shared, thread-safe metrics table keyed by backend.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    tallies: Arc<Mutex<HashMap<ProviderId, Tally>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, provider: &ProviderId, latency: Duration) {
        let latency_ms = duration_ms(latency);
        let mut tallies = self.tallies();
        let tally = tallies.entry(provider.clone()).or_default();
        tally.requests += 1;
        tally.successes += 1;
        tally.total_latency_ms = tally.total_latency_ms.saturating_add(latency_ms);
        if tally.recent_latencies.len() == LATENCY_WINDOW {
            tally.recent_latencies.pop_front();
        }
        tally.recent_latencies.push_back(latency_ms);
    }

    pub fn record_error(&self, provider: &ProviderId, error: &SourceError, at: UtcDateTime) {
        let mut tallies = self.tallies();
        let tally = tallies.entry(provider.clone()).or_default();
        tally.requests += 1;
        tally.errors += 1;
        tally.last_error = Some(error.to_string());
        tally.last_error_at = Some(at);
    }

    /// Counters for `provider`; a backend never called reads as all zeros.
    pub fn snapshot(&self, provider: &ProviderId) -> ProviderMetrics {
        self.tallies()
            .get(provider)
            .map(Tally::snapshot)
            .unwrap_or_default()
    }

    pub fn reset(&self) {
        self.tallies().clear();
    }

    fn tallies(&self) -> MutexGuard<'_, HashMap<ProviderId, Tally>> {
        self.tallies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
