//! Retention sweeps over the aggregate store.
//!
//! Each sweep groups partitions by the data type of their metric and
//! processes one data type at a time. A failing data type is logged and
//! reported but never stops the others. Cancellation is checked between
//! partitions.

use super::policy::{DataType, LifecycleTier, RetentionPolicy};
use crate::core::config::RetentionConfig;
use crate::core::{Result, RollupError, StorageTier};
use crate::storage::{AggregateStore, PartitionKey};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Which sweep produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepKind {
    Archival,
    Purge,
    Compression,
}

/// What happened to one data type during a sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SweepOutcome {
    Swept {
        partitions: usize,
        rows_examined: usize,
        rows_archived: usize,
        rows_purged: usize,
    },
    /// Policy inactive; rows left untouched.
    Inactive,
    Failed { message: String },
}

/// Per-data-type entry of a sweep report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataTypeSweep {
    pub data_type: DataType,
    pub outcome: SweepOutcome,
}

/// Result of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub kind: SweepKind,
    pub data_types: Vec<DataTypeSweep>,
    /// Compression ratio after the sweep, when the sweep recomputed it
    pub compression_ratio: Option<f64>,
    pub cancelled: bool,
}

impl SweepReport {
    fn new(kind: SweepKind) -> Self {
        Self {
            kind,
            data_types: Vec::new(),
            compression_ratio: None,
            cancelled: false,
        }
    }

    pub fn rows_archived(&self) -> usize {
        self.data_types
            .iter()
            .map(|d| match d.outcome {
                SweepOutcome::Swept { rows_archived, .. } => rows_archived,
                _ => 0,
            })
            .sum()
    }

    pub fn rows_purged(&self) -> usize {
        self.data_types
            .iter()
            .map(|d| match d.outcome {
                SweepOutcome::Swept { rows_purged, .. } => rows_purged,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.data_types
            .iter()
            .filter(|d| matches!(d.outcome, SweepOutcome::Failed { .. }))
            .count()
    }

    pub fn outcome(&self, data_type: DataType) -> Option<&SweepOutcome> {
        self.data_types
            .iter()
            .find(|d| d.data_type == data_type)
            .map(|d| &d.outcome)
    }
}

#[derive(Debug, Default)]
struct StepCounts {
    partitions: usize,
    rows_examined: usize,
    rows_archived: usize,
    rows_purged: usize,
}

/// Owns the policy table and runs lifecycle sweeps.
pub struct RetentionManager {
    policies: RwLock<BTreeMap<DataType, RetentionPolicy>>,
    metric_data_types: HashMap<String, DataType>,
    default_data_type: DataType,
    estimated_row_bytes: u64,
}

impl RetentionManager {
    pub fn new(config: &RetentionConfig, estimated_row_bytes: u64) -> Self {
        let policies = config
            .policies
            .iter()
            .map(|p| (p.data_type, p.clone()))
            .collect();

        Self {
            policies: RwLock::new(policies),
            metric_data_types: config.metric_data_types.clone(),
            default_data_type: config.default_data_type,
            estimated_row_bytes,
        }
    }

    /// Current policy table, ordered by data type.
    pub fn policies(&self) -> Vec<RetentionPolicy> {
        self.policies.read().values().cloned().collect()
    }

    pub fn policy(&self, data_type: DataType) -> Option<RetentionPolicy> {
        self.policies.read().get(&data_type).cloned()
    }

    /// Replace the policy for `policy.data_type` after validating it.
    pub fn update_policy(&self, policy: RetentionPolicy) -> Result<()> {
        policy.validate()?;
        info!(
            data_type = %policy.data_type,
            archive_after_days = policy.archive_after_days,
            purge_after_days = policy.purge_after_days,
            is_active = policy.is_active,
            "Retention policy updated"
        );
        self.policies.write().insert(policy.data_type, policy);
        Ok(())
    }

    /// Activate or deactivate the policy of `data_type`.
    pub fn set_policy_active(&self, data_type: DataType, active: bool) -> Result<()> {
        let mut policies = self.policies.write();
        let policy = policies.get_mut(&data_type).ok_or_else(|| {
            RollupError::invalid_policy(format!("no retention policy for data type '{}'", data_type))
        })?;
        policy.is_active = active;
        info!(data_type = %data_type, active, "Retention policy activation changed");
        Ok(())
    }

    /// Data type a metric's rows are governed by.
    pub fn data_type_for(&self, metric: &str) -> DataType {
        self.metric_data_types
            .get(metric)
            .copied()
            .unwrap_or(self.default_data_type)
    }

    /// Lifecycle tier of a row of `metric` with the given bucket start.
    pub fn tier_for(
        &self,
        metric: &str,
        bucket_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<LifecycleTier> {
        self.policy(self.data_type_for(metric))
            .map(|p| p.tier_for_age(now - bucket_start))
    }

    fn partitions_by_data_type(&self, store: &AggregateStore) -> BTreeMap<DataType, Vec<PartitionKey>> {
        let mut grouped: BTreeMap<DataType, Vec<PartitionKey>> = BTreeMap::new();
        for key in store.partition_keys() {
            grouped
                .entry(self.data_type_for(&key.metric))
                .or_default()
                .push(key);
        }
        grouped
    }

    /// Mark rows past their archive threshold as archived at the policy's
    /// compression level, then recompute the compression ratio.
    pub fn run_archival_sweep(
        &self,
        store: &AggregateStore,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SweepReport {
        let report = self.sweep(SweepKind::Archival, store, cancel, |policy, keys, cancel| {
            self.archive_step(store, policy, keys, now, cancel)
        });
        self.finish_with_ratio(report, store)
    }

    /// Remove rows whose bucket age reached the purge threshold.
    pub fn run_purge_sweep(
        &self,
        store: &AggregateStore,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SweepReport {
        self.sweep(SweepKind::Purge, store, cancel, |policy, keys, cancel| {
            Self::purge_step(store, policy, keys, now, cancel)
        })
    }

    /// Recompute the compression ratio without changing any row.
    pub fn run_compression_sweep(&self, store: &AggregateStore, cancel: &CancellationToken) -> SweepReport {
        let mut report = SweepReport::new(SweepKind::Compression);
        if cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }
        self.finish_with_ratio(report, store)
    }

    fn finish_with_ratio(&self, mut report: SweepReport, store: &AggregateStore) -> SweepReport {
        let ratio = self.compression_ratio(store);
        debug!(kind = ?report.kind, ratio, "Compression ratio recomputed");
        report.compression_ratio = Some(ratio);
        report
    }

    fn sweep<F>(
        &self,
        kind: SweepKind,
        store: &AggregateStore,
        cancel: &CancellationToken,
        mut step: F,
    ) -> SweepReport
    where
        F: FnMut(&RetentionPolicy, &[PartitionKey], &CancellationToken) -> Result<StepCounts>,
    {
        let mut report = SweepReport::new(kind);
        let grouped = self.partitions_by_data_type(store);

        for (data_type, keys) in grouped {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let outcome = match self.policy(data_type) {
                None => Err(RollupError::lifecycle(data_type, "no retention policy")),
                Some(policy) if !policy.is_active => {
                    debug!(data_type = %data_type, "Skipping inactive data type");
                    Ok(None)
                }
                Some(policy) => step(&policy, &keys, cancel).map(Some),
            };

            let outcome = match outcome {
                Ok(None) => SweepOutcome::Inactive,
                Ok(Some(counts)) => SweepOutcome::Swept {
                    partitions: counts.partitions,
                    rows_examined: counts.rows_examined,
                    rows_archived: counts.rows_archived,
                    rows_purged: counts.rows_purged,
                },
                Err(RollupError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    error!(data_type = %data_type, kind = ?kind, error = %e, "Sweep step failed");
                    SweepOutcome::Failed {
                        message: e.to_string(),
                    }
                }
            };
            report.data_types.push(DataTypeSweep { data_type, outcome });
        }

        info!(
            kind = ?kind,
            data_types = report.data_types.len(),
            archived = report.rows_archived(),
            purged = report.rows_purged(),
            failures = report.failures(),
            cancelled = report.cancelled,
            "Retention sweep finished"
        );
        report
    }

    fn archive_step(
        &self,
        store: &AggregateStore,
        policy: &RetentionPolicy,
        keys: &[PartitionKey],
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<StepCounts> {
        let archive_age = days(policy.data_type, policy.archive_after_days)?;
        let archived = StorageTier::Archived {
            level: policy.compression_level,
        };
        let mut counts = StepCounts::default();

        for key in keys {
            if cancel.is_cancelled() {
                return Err(RollupError::Cancelled);
            }
            let Some(partition) = store.partition(key) else {
                continue;
            };
            let mut partition = partition.write();
            let mut changed = 0;
            for row in partition.rows_mut() {
                counts.rows_examined += 1;
                let target = if now - row.bucket_start >= archive_age {
                    archived
                } else {
                    StorageTier::Live
                };
                if row.tier != target {
                    if target.is_archived() {
                        counts.rows_archived += 1;
                    }
                    row.tier = target;
                    changed += 1;
                }
            }
            counts.partitions += 1;
            debug!(partition = %key, changed, "Archival step");
        }
        Ok(counts)
    }

    fn purge_step(
        store: &AggregateStore,
        policy: &RetentionPolicy,
        keys: &[PartitionKey],
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<StepCounts> {
        let cutoff = purge_cutoff(policy.data_type, now, policy.purge_after_days)?;
        let mut counts = StepCounts::default();

        for key in keys {
            if cancel.is_cancelled() {
                return Err(RollupError::Cancelled);
            }
            let removed = store.prune_partition(key, cutoff);
            counts.partitions += 1;
            counts.rows_purged += removed;
            if removed > 0 {
                debug!(partition = %key, removed, "Purged rows");
            }
        }
        Ok(counts)
    }

    /// Raw bytes over stored bytes across every row; 1.0 with nothing archived.
    pub fn compression_ratio(&self, store: &AggregateStore) -> f64 {
        let row_bytes = self.estimated_row_bytes as f64;
        let mut raw = 0.0;
        let mut stored = 0.0;
        let mut any_archived = false;

        for key in store.partition_keys() {
            let Some(partition) = store.partition(&key) else {
                continue;
            };
            for row in partition.read().rows() {
                raw += row_bytes;
                stored += match row.tier {
                    StorageTier::Live => row_bytes,
                    StorageTier::Archived { level } => {
                        any_archived = true;
                        row_bytes * level.size_factor()
                    }
                };
            }
        }

        if !any_archived || stored <= 0.0 {
            1.0
        } else {
            raw / stored
        }
    }
}

fn days(data_type: DataType, n: u32) -> Result<ChronoDuration> {
    ChronoDuration::try_days(i64::from(n))
        .ok_or_else(|| RollupError::lifecycle(data_type, format!("{} days is out of range", n)))
}

/// Exclusive prune bound removing every bucket at least `purge_after_days` old.
pub(crate) fn purge_cutoff(
    data_type: DataType,
    now: DateTime<Utc>,
    purge_after_days: u32,
) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(days(data_type, purge_after_days)?)
        .and_then(|t| t.checked_add_signed(ChronoDuration::nanoseconds(1)))
        .ok_or_else(|| {
            RollupError::lifecycle(
                data_type,
                format!("purge cutoff {} days before {} is out of range", purge_after_days, now),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AggregationKind, CompressionLevel, Dimensions, Granularity};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn manager(policy: RetentionPolicy) -> RetentionManager {
        let config = RetentionConfig {
            policies: vec![policy],
            metric_data_types: HashMap::new(),
            default_data_type: DataType::UserEvents,
        };
        RetentionManager::new(&config, 100)
    }

    fn seed(store: &AggregateStore, metric: &str, ages_days: &[i64]) {
        for age in ages_days {
            store
                .upsert(
                    metric,
                    Granularity::Day,
                    now() - ChronoDuration::days(*age),
                    &Dimensions::new(),
                    1.0,
                    AggregationKind::Sum,
                )
                .unwrap();
        }
    }

    fn user_events_policy() -> RetentionPolicy {
        RetentionPolicy::new(DataType::UserEvents, 365, 90, CompressionLevel::Medium, 365)
    }

    #[test]
    fn test_purge_removes_rows_at_or_past_threshold() {
        let store = AggregateStore::new();
        seed(&store, "clicks", &[400, 365, 364, 100, 1]);
        let retention = manager(user_events_policy());

        let report = retention.run_purge_sweep(&store, now(), &CancellationToken::new());

        assert_eq!(report.rows_purged(), 2);
        assert_eq!(store.total_rows(), 3);
        assert!(!report.cancelled);
    }

    #[test]
    fn test_inactive_data_type_is_skipped() {
        let store = AggregateStore::new();
        seed(&store, "clicks", &[400, 1]);
        let retention = manager(user_events_policy());
        retention.set_policy_active(DataType::UserEvents, false).unwrap();

        let report = retention.run_purge_sweep(&store, now(), &CancellationToken::new());

        assert_eq!(report.outcome(DataType::UserEvents), Some(&SweepOutcome::Inactive));
        assert_eq!(store.total_rows(), 2);
    }

    #[test]
    fn test_archival_marks_rows_and_updates_ratio() {
        let store = AggregateStore::new();
        seed(&store, "clicks", &[100, 1]);
        let retention = manager(user_events_policy());

        let report = retention.run_archival_sweep(&store, now(), &CancellationToken::new());
        assert_eq!(report.rows_archived(), 1);

        // one live row (100 bytes) and one archived at medium (50 bytes)
        let ratio = report.compression_ratio.unwrap();
        assert!((ratio - 200.0 / 150.0).abs() < 1e-9);

        // second run finds nothing new
        let again = retention.run_archival_sweep(&store, now(), &CancellationToken::new());
        assert_eq!(again.rows_archived(), 0);
    }

    #[test]
    fn test_compression_ratio_defaults_to_one() {
        let store = AggregateStore::new();
        seed(&store, "clicks", &[1, 2]);
        let retention = manager(user_events_policy());
        let report = retention.run_compression_sweep(&store, &CancellationToken::new());
        assert_eq!(report.compression_ratio, Some(1.0));
    }

    #[test]
    fn test_missing_policy_fails_in_isolation() {
        let store = AggregateStore::new();
        seed(&store, "clicks", &[400]);
        seed(&store, "revenue", &[400]);

        let config = RetentionConfig {
            policies: vec![user_events_policy()],
            metric_data_types: [("revenue".to_string(), DataType::Financial)].into_iter().collect(),
            default_data_type: DataType::UserEvents,
        };
        let retention = RetentionManager::new(&config, 100);

        let report = retention.run_purge_sweep(&store, now(), &CancellationToken::new());

        assert_eq!(report.failures(), 1);
        assert!(matches!(
            report.outcome(DataType::Financial),
            Some(SweepOutcome::Failed { .. })
        ));
        assert_eq!(report.rows_purged(), 1);
        assert_eq!(store.total_rows(), 1);
    }

    #[test]
    fn test_cancelled_sweep_stops_early() {
        let store = AggregateStore::new();
        seed(&store, "clicks", &[400]);
        let retention = manager(user_events_policy());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = retention.run_purge_sweep(&store, now(), &cancel);

        assert!(report.cancelled);
        assert!(report.data_types.is_empty());
        assert_eq!(store.total_rows(), 1);
    }

    #[test]
    fn test_update_policy_validates() {
        let retention = manager(user_events_policy());
        let broken = RetentionPolicy::new(DataType::UserEvents, 10, 50, CompressionLevel::Low, 20);
        assert!(retention.update_policy(broken).is_err());

        let shorter = RetentionPolicy::new(DataType::UserEvents, 30, 7, CompressionLevel::High, 30);
        retention.update_policy(shorter.clone()).unwrap();
        assert_eq!(retention.policy(DataType::UserEvents), Some(shorter));
    }

    #[test]
    fn test_set_active_on_unknown_type() {
        let retention = manager(user_events_policy());
        assert!(retention.set_policy_active(DataType::Orders, false).is_err());
    }

    #[test]
    fn test_tier_for() {
        let retention = manager(user_events_policy());
        let tier = retention.tier_for("clicks", now() - ChronoDuration::days(100), now());
        assert_eq!(tier, Some(LifecycleTier::Archived));
    }
}
