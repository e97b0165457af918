//! Behavior tests for concurrent backend health probes.

mod support;

use std::time::{Duration, Instant};

use support::{Call, SpyAdapter};
use tickrelay_core::{HealthAggregator, HealthStatus, ProviderId, SourceError, SourceRouter};

#[tokio::test]
async fn when_health_checks_finish_system_reports_in_priority_order() {
    // Given: three backends registered out of priority order
    let router = SourceRouter::builder()
        .register(SpyAdapter::new("third").build(), 30)
        .register(SpyAdapter::new("first").build(), 10)
        .register(SpyAdapter::new("second").build(), 20)
        .build();

    // When: health is checked
    let report = HealthAggregator::new(&router).check().await;

    // Then: entries follow trial order and all are healthy
    let order: Vec<&str> = report
        .entries
        .iter()
        .map(|entry| entry.provider.as_str())
        .collect();
    assert_eq!(order, vec!["first", "second", "third"]);
    assert!(report.all_healthy());
    assert_eq!(report.entries[0].priority, 10);
}

#[tokio::test]
async fn when_health_check_is_rate_limited_system_counts_backend_as_healthy() {
    // Given: a backend that rejects the probe with a rate limit
    let throttled = SpyAdapter::new("throttled")
        .health(Err(SourceError::rate_limited(Some(30))))
        .build();
    let router = SourceRouter::builder().register(throttled.clone(), 0).build();

    // When: health is checked
    let report = HealthAggregator::new(&router).check().await;

    // Then: answering at all is enough to be healthy, and no cooldown is recorded
    assert_eq!(
        report.status_of(&ProviderId::new("throttled")),
        Some(&HealthStatus::Healthy)
    );
    assert!(router.cooldowns().is_available(&ProviderId::new("throttled")));
    assert_eq!(throttled.calls(), vec![Call::Health]);
}

#[tokio::test]
async fn when_health_check_fails_system_marks_backend_unreachable_with_reason() {
    // Given: one failing and one negative backend alongside a healthy one
    let router = SourceRouter::builder()
        .register(SpyAdapter::new("ok").build(), 0)
        .register(
            SpyAdapter::new("down")
                .health(Err(SourceError::provider("connection refused")))
                .build(),
            1,
        )
        .register(SpyAdapter::new("sick").health(Ok(false)).build(), 2)
        .build();

    // When: health is checked
    let report = HealthAggregator::new(&router).check().await;

    // Then: each backend gets its own status and the others are unaffected
    assert_eq!(
        report.status_of(&ProviderId::new("ok")),
        Some(&HealthStatus::Healthy)
    );
    match report.status_of(&ProviderId::new("down")) {
        Some(HealthStatus::Unreachable { reason }) => {
            assert!(reason.contains("connection refused"), "reason: {reason}");
        }
        other => panic!("unexpected status: {other:?}"),
    }
    assert_eq!(
        report.status_of(&ProviderId::new("sick")),
        Some(&HealthStatus::Unhealthy)
    );
    assert_eq!(report.healthy_count(), 1);
    assert!(!report.all_healthy());
}

#[tokio::test]
async fn when_health_check_hangs_system_times_it_out_without_blocking_others() {
    // Given: one backend that never answers within the deadline
    let router = SourceRouter::builder()
        .register(
            SpyAdapter::new("hung")
                .slow_health(Duration::from_secs(30))
                .build(),
            0,
        )
        .register(SpyAdapter::new("quick").build(), 1)
        .build();

    // When: health is checked with a 50ms probe deadline
    let started = Instant::now();
    let report = HealthAggregator::new(&router)
        .with_probe_timeout(Duration::from_millis(50))
        .check()
        .await;

    // Then: the hung backend is unreachable and the check returned promptly
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        report.status_of(&ProviderId::new("hung")),
        Some(&HealthStatus::Unreachable {
            reason: "probe timed out after 50ms".to_string()
        })
    );
    assert_eq!(
        report.status_of(&ProviderId::new("quick")),
        Some(&HealthStatus::Healthy)
    );
}

#[tokio::test]
async fn when_several_health_checks_are_slow_system_runs_them_concurrently() {
    // Given: four backends that each take 200ms to answer
    let mut builder = SourceRouter::builder();
    for (priority, name) in ["a", "b", "c", "d"].into_iter().enumerate() {
        builder = builder.register(
            SpyAdapter::new(name)
                .slow_health(Duration::from_millis(200))
                .build(),
            priority as i32,
        );
    }
    let router = builder.build();

    // When: health is checked
    let started = Instant::now();
    let report = HealthAggregator::new(&router).check().await;

    // Then: the total is far below the sequential sum
    assert!(started.elapsed() < Duration::from_millis(700));
    assert_eq!(report.healthy_count(), 4);
}

#[tokio::test]
async fn when_no_backend_is_registered_system_reports_not_all_healthy() {
    // Given: an empty router
    let router = SourceRouter::builder().build();

    // When: health is checked
    let report = HealthAggregator::new(&router).check().await;

    // Then: the report is empty and does not claim health
    assert!(report.entries.is_empty());
    assert!(!report.all_healthy());
}

#[test]
fn when_report_is_serialized_system_flattens_status() {
    // Given: an unreachable entry
    let status = HealthStatus::Unreachable {
        reason: "probe timed out after 50ms".to_string(),
    };

    // When: it is serialized
    let json = serde_json::to_value(&status).expect("serializable");

    // Then: the status tag and reason sit side by side
    assert_eq!(json["status"], "unreachable");
    assert_eq!(json["reason"], "probe timed out after 50ms");
}
