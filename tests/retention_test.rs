//! Retention and lifecycle tests.

mod common;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::{test_now, test_warehouse, test_warehouse_with, TestSampleBuilder};
use rollup_lib::core::{CompressionLevel, ConfigBuilder, Granularity, StorageTier};
use rollup_lib::retention::{DataType, LifecycleTier, RetentionPolicy, SweepOutcome};

fn far_past() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

fn scenario_warehouse() -> common::TestWarehouse {
    let config = ConfigBuilder::new()
        .retention_policy(RetentionPolicy::new(
            DataType::UserEvents,
            365,
            90,
            CompressionLevel::Medium,
            365,
        ))
        .build()
        .unwrap();
    test_warehouse_with(config)
}

#[test]
fn test_purge_and_archive_scenario() {
    let t = scenario_warehouse();
    assert_eq!(t.warehouse.data_type_for("clicks"), DataType::UserEvents);

    t.warehouse
        .ingest(TestSampleBuilder::new("clicks", 1.0).days_ago(400).build())
        .unwrap();
    t.warehouse
        .ingest(TestSampleBuilder::new("clicks", 1.0).days_ago(100).build())
        .unwrap();

    let purge = t.warehouse.run_purge_sweep();
    assert!(purge.rows_purged() >= 1);
    let archival = t.warehouse.run_archival_sweep();
    assert!(archival.rows_archived() >= 1);

    let rows = t
        .warehouse
        .query("clicks", Granularity::Day, far_past(), test_now(), None)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].bucket_start,
        Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap()
    );
    assert_eq!(
        rows[0].tier,
        StorageTier::Archived {
            level: CompressionLevel::Medium
        }
    );
    assert_eq!(rows[0].value, 1.0);

    let status = t.warehouse.get_warehouse_status();
    assert!(status.compression_ratio > 1.0);
}

#[test]
fn test_no_row_past_threshold_survives_purge() {
    let t = scenario_warehouse();
    for days_ago in [0, 30, 200, 364, 365, 366, 500, 900] {
        t.warehouse
            .ingest(TestSampleBuilder::new("clicks", 1.0).days_ago(days_ago).build())
            .unwrap();
    }

    t.warehouse.run_purge_sweep();

    let policy = RetentionPolicy::new(DataType::UserEvents, 365, 90, CompressionLevel::Medium, 365);
    for granularity in Granularity::ALL {
        let rows = t
            .warehouse
            .query("clicks", granularity, far_past(), test_now(), None)
            .unwrap();
        for row in rows {
            assert_ne!(
                policy.tier_for_age(test_now() - row.bucket_start),
                LifecycleTier::Purged,
                "{} row at {} survived",
                granularity,
                row.bucket_start
            );
        }
    }
}

#[test]
fn test_inactive_policy_is_never_purged() {
    let t = scenario_warehouse();
    t.warehouse
        .ingest(TestSampleBuilder::new("clicks", 1.0).days_ago(400).build())
        .unwrap();
    t.warehouse.set_policy_active(DataType::UserEvents, false).unwrap();

    let report = t.warehouse.run_purge_sweep();
    assert_eq!(report.outcome(DataType::UserEvents), Some(&SweepOutcome::Inactive));
    let archival = t.warehouse.run_archival_sweep();
    assert_eq!(archival.rows_archived(), 0);

    // the optimizer's pruning pass leaves it alone too
    t.warehouse.run_optimization_cycle().unwrap();

    let rows = t
        .warehouse
        .query("clicks", Granularity::Day, far_past(), test_now(), None)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tier, StorageTier::Live);

    t.warehouse.set_policy_active(DataType::UserEvents, true).unwrap();
    t.warehouse.run_purge_sweep();
    let rows = t
        .warehouse
        .query("clicks", Granularity::Day, far_past(), test_now(), None)
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_data_types_are_swept_independently() {
    let t = test_warehouse();
    let unmapped_metric = "checkout_errors";

    t.warehouse
        .ingest(TestSampleBuilder::new("revenue", 10.0).days_ago(200).build())
        .unwrap();
    t.warehouse
        .ingest(TestSampleBuilder::new(unmapped_metric, 1.0).days_ago(200).build())
        .unwrap();

    let report = t.warehouse.run_purge_sweep();
    assert_eq!(report.failures(), 0);
    assert!(matches!(
        report.outcome(DataType::Financial),
        Some(SweepOutcome::Swept { rows_purged: 0, .. })
    ));

    // checkout_errors falls back to the default data type (user_events, purge 730)
    let rows = t
        .warehouse
        .query(unmapped_metric, Granularity::Day, far_past(), test_now(), None)
        .unwrap();
    assert_eq!(rows.len(), 1);
    let rows = t
        .warehouse
        .query("revenue", Granularity::Day, far_past(), test_now(), None)
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_clock_drives_lifecycle() {
    let t = scenario_warehouse();
    t.warehouse
        .ingest(TestSampleBuilder::new("clicks", 3.0).build())
        .unwrap();

    t.clock.advance(ChronoDuration::days(100));
    let archival = t.warehouse.run_archival_sweep();
    assert!(archival.rows_archived() > 0);

    t.clock.advance(ChronoDuration::days(300));
    t.warehouse.run_purge_sweep();
    assert_eq!(t.warehouse.store().total_rows(), 0);
}

#[test]
fn test_invalid_policy_update_rejected() {
    let t = test_warehouse();
    let before = t.warehouse.policies();
    let err = t
        .warehouse
        .update_policy(RetentionPolicy::new(
            DataType::Orders,
            100,
            400,
            CompressionLevel::Low,
            365,
        ))
        .unwrap_err();
    assert_eq!(err.category(), "config");
    assert_eq!(t.warehouse.policies(), before);
}

#[test]
fn test_compression_sweep_reports_ratio() {
    let t = scenario_warehouse();
    t.warehouse
        .ingest(TestSampleBuilder::new("clicks", 1.0).build())
        .unwrap();
    let report = t.warehouse.run_compression_sweep();
    assert_eq!(report.compression_ratio, Some(1.0));
    assert_eq!(t.warehouse.get_warehouse_status().compression_ratio, 1.0);
}
