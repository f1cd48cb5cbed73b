//! In-memory aggregate store partitioned by (metric, granularity).
//!
//! Each partition sits behind its own lock so upserts and prunes on one
//! partition are serialized while different partitions proceed
//! independently. Inside a partition rows are ordered by
//! `(bucket_start, dimensions)`, which makes range scans and prunes a
//! single ordered walk.

use crate::core::{
    AggregateRow, AggregationKind, Dimensions, Granularity, Result, RollupError, RowId,
    StorageTier,
};
use ahash::RandomState;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub metric: String,
    pub granularity: Granularity,
}

impl PartitionKey {
    pub fn new(metric: impl Into<String>, granularity: Granularity) -> Self {
        Self {
            metric: metric.into(),
            granularity,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.metric, self.granularity)
    }
}

type RowKey = (DateTime<Utc>, Dimensions);

/// Rows of one (metric, granularity) pair.
#[derive(Debug, Default)]
pub struct Partition {
    rows: BTreeMap<RowKey, AggregateRow>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &AggregateRow> {
        self.rows.values()
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut AggregateRow> {
        self.rows.values_mut()
    }

    /// Rows with `start <= bucket_start <= end`, ascending.
    fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &AggregateRow> {
        self.rows
            .range((Bound::Included((start, Dimensions::new())), Bound::Unbounded))
            .take_while(move |((bucket, _), _)| *bucket <= end)
            .map(|(_, row)| row)
    }

    /// Drop rows with `bucket_start < older_than`; returns how many went.
    fn prune(&mut self, older_than: DateTime<Utc>) -> usize {
        let kept = self.rows.split_off(&(older_than, Dimensions::new()));
        let removed = self.rows.len();
        self.rows = kept;
        removed
    }
}

/// Outcome of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was created.
    Created(RowId),
    /// An existing row absorbed the sample.
    Updated(RowId),
}

/// Result of scanning one partition.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Matching rows in `bucket_start` order.
    pub rows: Vec<AggregateRow>,
    /// Rows in the partition before any filtering.
    pub rows_scanned: usize,
}

/// Aggregate store holding every partition.
pub struct AggregateStore {
    partitions: DashMap<PartitionKey, Arc<RwLock<Partition>>, RandomState>,
    /// Aggregation kind registered per metric on first sight
    metric_kinds: DashMap<String, AggregationKind, RandomState>,
    next_row_id: AtomicU64,
}

impl Default for AggregateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateStore {
    pub fn new() -> Self {
        Self {
            partitions: DashMap::with_hasher(RandomState::new()),
            metric_kinds: DashMap::with_hasher(RandomState::new()),
            next_row_id: AtomicU64::new(1),
        }
    }

    /// Register `kind` for `metric`, or verify it matches the registered one.
    pub fn check_kind(&self, metric: &str, kind: AggregationKind) -> Result<()> {
        let registered = *self
            .metric_kinds
            .entry(metric.to_string())
            .or_insert(kind);
        if registered != kind {
            return Err(RollupError::AggregationKindMismatch {
                metric: metric.to_string(),
                expected: registered.to_string(),
                actual: kind.to_string(),
            });
        }
        Ok(())
    }

    /// Aggregation kind registered for `metric`, if any sample was seen.
    pub fn kind_of(&self, metric: &str) -> Option<AggregationKind> {
        self.metric_kinds.get(metric).map(|k| *k)
    }

    /// Handle to a partition, if it exists. The map lock is released on return.
    pub fn partition(&self, key: &PartitionKey) -> Option<Arc<RwLock<Partition>>> {
        self.partitions.get(key).map(|p| Arc::clone(p.value()))
    }

    fn partition_or_create(&self, key: PartitionKey) -> Arc<RwLock<Partition>> {
        if let Some(existing) = self.partition(&key) {
            return existing;
        }
        Arc::clone(self.partitions.entry(key).or_default().value())
    }

    /// Snapshot of the current partition keys.
    pub fn partition_keys(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<_> = self.partitions.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Create or incrementally update the row for
    /// (metric, granularity, bucket_start, dimensions).
    pub fn upsert(
        &self,
        metric: &str,
        granularity: Granularity,
        bucket_start: DateTime<Utc>,
        dimensions: &Dimensions,
        sample: f64,
        kind: AggregationKind,
    ) -> Result<UpsertOutcome> {
        let partition = self.partition_or_create(PartitionKey::new(metric, granularity));
        let mut partition = partition.write();

        let key = (bucket_start, dimensions.clone());
        if let Some(row) = partition.rows.get_mut(&key) {
            if row.aggregation != kind {
                return Err(RollupError::AggregationKindMismatch {
                    metric: metric.to_string(),
                    expected: row.aggregation.to_string(),
                    actual: kind.to_string(),
                });
            }
            row.apply(sample);
            return Ok(UpsertOutcome::Updated(row.id));
        }

        let id = RowId(self.next_row_id.fetch_add(1, Ordering::Relaxed));
        let row = AggregateRow {
            id,
            metric: metric.to_string(),
            granularity,
            aggregation: kind,
            bucket_start,
            dimensions: key.1.clone(),
            value: kind.initial(sample),
            sample_count: 1,
            tier: StorageTier::Live,
        };
        partition.rows.insert(key, row);
        Ok(UpsertOutcome::Created(id))
    }

    /// Rows with `bucket_start` in `[start, end]` matching `filter`, ascending.
    pub fn scan(
        &self,
        metric: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: Option<&Dimensions>,
    ) -> ScanResult {
        let Some(partition) = self.partition(&PartitionKey::new(metric, granularity)) else {
            return ScanResult::default();
        };
        let partition = partition.read();

        let rows = partition
            .range(start, end)
            .filter(|row| filter.map_or(true, |f| row.dimensions.matches(f)))
            .cloned()
            .collect();

        ScanResult {
            rows,
            rows_scanned: partition.len(),
        }
    }

    /// Remove rows with `bucket_start < older_than`; returns the count removed.
    pub fn prune(&self, metric: &str, granularity: Granularity, older_than: DateTime<Utc>) -> usize {
        self.prune_partition(&PartitionKey::new(metric, granularity), older_than)
    }

    pub(crate) fn prune_partition(&self, key: &PartitionKey, older_than: DateTime<Utc>) -> usize {
        match self.partition(key) {
            Some(partition) => partition.write().prune(older_than),
            None => 0,
        }
    }

    /// Sum of row counts across all partitions.
    pub fn total_rows(&self) -> usize {
        self.partition_keys()
            .iter()
            .filter_map(|key| self.partition(key))
            .map(|p| p.read().len())
            .sum()
    }

    /// Drop every partition and metric registration.
    pub fn clear(&self) {
        self.partitions.clear();
        self.metric_kinds.clear();
    }
}
