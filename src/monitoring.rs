//! Operational counters and the warehouse status reporter.
//!
//! Counters are plain atomics updated on the ingestion and query paths;
//! [`WarehouseMetrics`] is the read-only snapshot handed to consumers.

use crate::core::Clock;
use crate::storage::AggregateStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide counters shared by the ingestion, query and background paths.
#[derive(Debug)]
pub struct WarehouseCounters {
    samples_ingested: AtomicU64,
    rows_created: AtomicU64,
    durable_failures: AtomicU64,
    query_count: AtomicU64,
    /// Sum of query durations in nanoseconds
    query_nanos: AtomicU64,
    /// f64 stored as bits
    index_efficiency: AtomicU64,
    /// f64 stored as bits
    compression_ratio: AtomicU64,
    last_optimization_at: RwLock<Option<DateTime<Utc>>>,
}

impl Default for WarehouseCounters {
    fn default() -> Self {
        Self {
            samples_ingested: AtomicU64::new(0),
            rows_created: AtomicU64::new(0),
            durable_failures: AtomicU64::new(0),
            query_count: AtomicU64::new(0),
            query_nanos: AtomicU64::new(0),
            index_efficiency: AtomicU64::new(0f64.to_bits()),
            compression_ratio: AtomicU64::new(1f64.to_bits()),
            last_optimization_at: RwLock::new(None),
        }
    }
}

impl WarehouseCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingest(&self, rows_created: u64) {
        self.samples_ingested.fetch_add(1, Ordering::Relaxed);
        self.rows_created.fetch_add(rows_created, Ordering::Relaxed);
    }

    pub fn record_durable_failure(&self) {
        self.durable_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration: std::time::Duration) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.query_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn samples_ingested(&self) -> u64 {
        self.samples_ingested.load(Ordering::Relaxed)
    }

    pub fn rows_created(&self) -> u64 {
        self.rows_created.load(Ordering::Relaxed)
    }

    pub fn durable_failures(&self) -> u64 {
        self.durable_failures.load(Ordering::Relaxed)
    }

    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    pub fn average_query_duration_ms(&self) -> f64 {
        let count = self.query_count();
        if count == 0 {
            return 0.0;
        }
        self.query_nanos.load(Ordering::Relaxed) as f64 / count as f64 / 1_000_000.0
    }

    pub fn index_efficiency(&self) -> f64 {
        f64::from_bits(self.index_efficiency.load(Ordering::Relaxed))
    }

    /// Raise index efficiency by `step` percent, capped at 100.
    pub fn raise_index_efficiency(&self, step: f64) -> f64 {
        let mut current = self.index_efficiency.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + step).clamp(0.0, 100.0);
            match self.index_efficiency.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn compression_ratio(&self) -> f64 {
        f64::from_bits(self.compression_ratio.load(Ordering::Relaxed))
    }

    pub fn set_compression_ratio(&self, ratio: f64) {
        self.compression_ratio.store(ratio.to_bits(), Ordering::Relaxed);
    }

    pub fn last_optimization_at(&self) -> Option<DateTime<Utc>> {
        *self.last_optimization_at.read()
    }

    pub fn set_last_optimization_at(&self, at: DateTime<Utc>) {
        *self.last_optimization_at.write() = Some(at);
    }

    /// Zero the ingestion and query counters; optimizer state is kept.
    pub fn reset_activity(&self) {
        self.samples_ingested.store(0, Ordering::Relaxed);
        self.rows_created.store(0, Ordering::Relaxed);
        self.durable_failures.store(0, Ordering::Relaxed);
        self.query_count.store(0, Ordering::Relaxed);
        self.query_nanos.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of warehouse health for external observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseMetrics {
    pub total_rows: usize,
    pub estimated_byte_size: u64,
    pub partitions: usize,
    pub samples_ingested: u64,
    pub durable_failures: u64,
    pub query_count: u64,
    pub average_query_duration_ms: f64,
    pub index_efficiency_percent: f64,
    pub compression_ratio: f64,
    pub last_optimization_at: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

/// Builds [`WarehouseMetrics`] from the store and the shared counters.
pub struct StatusReporter {
    store: Arc<AggregateStore>,
    counters: Arc<WarehouseCounters>,
    clock: Arc<dyn Clock>,
    estimated_row_bytes: u64,
}

impl StatusReporter {
    pub fn new(
        store: Arc<AggregateStore>,
        counters: Arc<WarehouseCounters>,
        clock: Arc<dyn Clock>,
        estimated_row_bytes: u64,
    ) -> Self {
        Self {
            store,
            counters,
            clock,
            estimated_row_bytes,
        }
    }

    /// Read-only snapshot; walks every partition once.
    pub fn snapshot(&self) -> WarehouseMetrics {
        let total_rows = self.store.total_rows();
        WarehouseMetrics {
            total_rows,
            estimated_byte_size: total_rows as u64 * self.estimated_row_bytes,
            partitions: self.store.partition_count(),
            samples_ingested: self.counters.samples_ingested(),
            durable_failures: self.counters.durable_failures(),
            query_count: self.counters.query_count(),
            average_query_duration_ms: self.counters.average_query_duration_ms(),
            index_efficiency_percent: self.counters.index_efficiency(),
            compression_ratio: self.counters.compression_ratio(),
            last_optimization_at: self.counters.last_optimization_at(),
            generated_at: self.clock.now(),
        }
    }
}
