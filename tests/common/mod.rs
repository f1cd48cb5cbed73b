//! Common test utilities and fixtures.

#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rollup_lib::core::{
    AggregationKind, Config, ManualClock, MetricSample, Result, RollupError,
};
use rollup_lib::storage::{BackupId, BackupInfo, DurableStore, InMemoryDurableStore};
use rollup_lib::Warehouse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fixed "now" used by every fixture: a Wednesday afternoon.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 18, 15, 30, 0).unwrap()
}

/// Test fixture builder for creating samples with sensible defaults.
pub struct TestSampleBuilder {
    metric: String,
    value: f64,
    timestamp: DateTime<Utc>,
    kind: AggregationKind,
    dimensions: Vec<(String, String)>,
}

impl TestSampleBuilder {
    pub fn new(metric: &str, value: f64) -> Self {
        Self {
            metric: metric.to_string(),
            value,
            timestamp: test_now(),
            kind: AggregationKind::Sum,
            dimensions: Vec::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn days_ago(mut self, days: i64) -> Self {
        self.timestamp = test_now() - ChronoDuration::days(days);
        self
    }

    pub fn kind(mut self, kind: AggregationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn dim(mut self, key: &str, value: &str) -> Self {
        self.dimensions.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> MetricSample {
        let mut sample = MetricSample::new(self.metric, self.value, self.timestamp, self.kind);
        for (key, value) in self.dimensions {
            sample = sample.with_dimension(key, value);
        }
        sample
    }
}

/// Durable store whose appends can be switched to fail.
#[derive(Default)]
pub struct FailingDurableStore {
    inner: InMemoryDurableStore,
    failing: AtomicBool,
}

impl FailingDurableStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl DurableStore for FailingDurableStore {
    fn append(&self, sample: &MetricSample) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RollupError::store_write("disk unavailable"));
        }
        self.inner.append(sample)
    }

    fn read_all(&self) -> Result<Vec<MetricSample>> {
        self.inner.read_all()
    }

    fn create_backup(&self, now: DateTime<Utc>) -> Result<BackupInfo> {
        self.inner.create_backup(now)
    }

    fn restore_backup(&self, id: &BackupId) -> Result<Vec<MetricSample>> {
        self.inner.restore_backup(id)
    }
}

/// Warehouse on a manual clock set to [`test_now`].
pub struct TestWarehouse {
    pub warehouse: Arc<Warehouse>,
    pub clock: Arc<ManualClock>,
}

pub fn test_warehouse() -> TestWarehouse {
    test_warehouse_with(Config::default())
}

pub fn test_warehouse_with(config: Config) -> TestWarehouse {
    let clock = Arc::new(ManualClock::new(test_now()));
    let warehouse = Warehouse::builder(config)
        .clock(Arc::clone(&clock) as Arc<dyn rollup_lib::core::Clock>)
        .build()
        .unwrap();
    TestWarehouse {
        warehouse: Arc::new(warehouse),
        clock,
    }
}

pub fn warehouse_with_store(store: Arc<dyn DurableStore>) -> TestWarehouse {
    let clock = Arc::new(ManualClock::new(test_now()));
    let warehouse = Warehouse::builder(Config::default())
        .clock(Arc::clone(&clock) as Arc<dyn rollup_lib::core::Clock>)
        .durable_store(store)
        .build()
        .unwrap();
    TestWarehouse {
        warehouse: Arc::new(warehouse),
        clock,
    }
}
