//! Durable store seam for raw samples.
//!
//! The aggregation layer only needs an append primitive for raw samples
//! and bulk snapshot/restore for backups; all query serving happens from
//! the in-memory aggregates.

use crate::core::{MetricSample, Result, RollupError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a backup held by the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupId(pub String);

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata returned when a backup is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub id: BackupId,
    pub created_at: DateTime<Utc>,
    pub sample_count: usize,
}

/// Trait for durable raw-sample stores.
pub trait DurableStore: Send + Sync {
    /// Append one raw sample.
    fn append(&self, sample: &MetricSample) -> Result<()>;

    /// Read every stored sample in append order.
    fn read_all(&self) -> Result<Vec<MetricSample>>;

    /// Snapshot the current contents.
    fn create_backup(&self, now: DateTime<Utc>) -> Result<BackupInfo>;

    /// Reset the store to a snapshot and return its samples.
    fn restore_backup(&self, id: &BackupId) -> Result<Vec<MetricSample>>;
}

/// Append-only in-memory log with named snapshots.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    log: RwLock<Vec<MetricSample>>,
    backups: Mutex<HashMap<BackupId, Vec<MetricSample>>>,
    backup_seq: AtomicU64,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples currently in the log.
    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for InMemoryDurableStore {
    fn append(&self, sample: &MetricSample) -> Result<()> {
        self.log.write().push(sample.clone());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<MetricSample>> {
        Ok(self.log.read().clone())
    }

    fn create_backup(&self, now: DateTime<Utc>) -> Result<BackupInfo> {
        let snapshot = self.log.read().clone();
        let seq = self.backup_seq.fetch_add(1, Ordering::Relaxed);
        let id = BackupId(format!("backup-{}-{}", now.format("%Y%m%dT%H%M%S"), seq));
        let info = BackupInfo {
            id: id.clone(),
            created_at: now,
            sample_count: snapshot.len(),
        };
        self.backups.lock().insert(id, snapshot);
        Ok(info)
    }

    fn restore_backup(&self, id: &BackupId) -> Result<Vec<MetricSample>> {
        let samples = self
            .backups
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| RollupError::BackupNotFound(id.to_string()))?;
        *self.log.write() = samples.clone();
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AggregationKind;

    #[test]
    fn test_append_and_read() {
        let store = InMemoryDurableStore::new();
        let now = Utc::now();
        store
            .append(&MetricSample::new("revenue", 10.0, now, AggregationKind::Sum))
            .unwrap();
        store
            .append(&MetricSample::new("revenue", 20.0, now, AggregationKind::Sum))
            .unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].value, 20.0);
    }

    #[test]
    fn test_backup_and_restore() {
        let store = InMemoryDurableStore::new();
        let now = Utc::now();
        store
            .append(&MetricSample::new("orders", 1.0, now, AggregationKind::Count))
            .unwrap();

        let backup = store.create_backup(now).unwrap();
        assert_eq!(backup.sample_count, 1);

        store
            .append(&MetricSample::new("orders", 1.0, now, AggregationKind::Count))
            .unwrap();
        assert_eq!(store.len(), 2);

        let restored = store.restore_backup(&backup.id).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_backup() {
        let store = InMemoryDurableStore::new();
        let err = store
            .restore_backup(&BackupId("backup-missing".to_string()))
            .unwrap_err();
        assert_eq!(err.category(), "not_found");
    }

    #[test]
    fn test_backup_ids_are_unique() {
        let store = InMemoryDurableStore::new();
        let now = Utc::now();
        let a = store.create_backup(now).unwrap();
        let b = store.create_backup(now).unwrap();
        assert_ne!(a.id, b.id);
    }
}
