use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use tickrelay_core::{HealthAggregator, SourceRouter};

use crate::error::CliError;

pub async fn run(router: &SourceRouter, probe_timeout: Duration) -> Result<Value, CliError> {
    let report = HealthAggregator::new(router)
        .with_probe_timeout(probe_timeout)
        .check()
        .await;

    if !report.all_healthy() {
        warn!(
            healthy = report.healthy_count(),
            total = report.entries.len(),
            "some providers are not healthy"
        );
    }
    Ok(serde_json::to_value(report)?)
}
