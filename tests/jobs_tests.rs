//! Integration tests for background jobs.
//!
//! These tests require the `background-jobs` feature to be enabled.

#![cfg(feature = "background-jobs")]

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use spectre::clock::ManualClock;
use spectre::config::{JobsConfig, SpectreConfig};
use spectre::engine::{IssueRequest, LicenseEngine};
use spectre::jobs::{run_expired_scan, JobScheduler};
use spectre::store::Database;
use spectre::tiers::Tier;

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 8, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

async fn setup() -> (LicenseEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let engine = LicenseEngine::new(Arc::new(Database::memory()), &SpectreConfig::default())
        .expect("failed to build engine")
        .with_clock(clock.clone());

    for (issued_to, days) in [("alice", 1), ("bob", 5), ("carol", 60)] {
        engine
            .issue(
                IssueRequest::new(Tier::Lite, 10, issued_to)
                    .with_expiry(start() + Duration::days(days)),
            )
            .await
            .expect("failed to issue license");
    }
    engine
        .issue(IssueRequest::new(Tier::Premium, 10, "dave"))
        .await
        .expect("failed to issue license");

    (engine, clock)
}

#[tokio::test]
async fn expired_scan_finds_nothing_before_expiry() {
    let (engine, _) = setup().await;

    let scan = run_expired_scan(&engine).await.unwrap();
    assert!(scan.expired.is_empty());
    assert!(scan.integrity_warnings.is_empty());
}

#[tokio::test]
async fn expired_scan_follows_the_clock() {
    let (engine, clock) = setup().await;

    clock.advance(Duration::days(2));
    let scan = run_expired_scan(&engine).await.unwrap();
    assert_eq!(scan.expired.len(), 1);
    assert_eq!(scan.expired[0].issued_to, "alice");

    clock.advance(Duration::days(10));
    let scan = run_expired_scan(&engine).await.unwrap();
    let mut names: Vec<_> = scan.expired.iter().map(|l| l.issued_to.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["alice", "bob"]);
}

#[tokio::test]
async fn expired_scan_leaves_records_in_place() {
    let (engine, clock) = setup().await;
    clock.advance(Duration::days(90));

    let scan = run_expired_scan(&engine).await.unwrap();
    assert_eq!(scan.expired.len(), 3);

    for license in &scan.expired {
        let stats = engine.stats(&license.key).await.unwrap();
        assert!(stats.license.active);
        assert!(stats.is_expired);
    }
}

#[tokio::test]
async fn scheduler_runs_scan_on_demand() {
    let (engine, clock) = setup().await;
    clock.advance(Duration::days(2));

    let scheduler = JobScheduler::new(engine, &JobsConfig::default())
        .await
        .expect("failed to create scheduler");

    let scan = scheduler.run_expired_scan_now().await.unwrap();
    assert_eq!(scan.expired.len(), 1);
}

#[tokio::test]
async fn scheduler_starts_and_shuts_down() {
    let (engine, _) = setup().await;

    let mut scheduler = JobScheduler::new(engine, &JobsConfig::default())
        .await
        .expect("failed to create scheduler");

    scheduler.start().await.expect("failed to start scheduler");
    scheduler.shutdown().await.expect("failed to shut down");
}

#[tokio::test]
async fn invalid_cron_expression_fails_to_start() {
    let (engine, _) = setup().await;
    let config = JobsConfig {
        expired_scan_cron: "every tuesday".to_string(),
    };

    let scheduler = JobScheduler::new(engine, &config)
        .await
        .expect("failed to create scheduler");

    assert!(scheduler.start().await.is_err());
}
