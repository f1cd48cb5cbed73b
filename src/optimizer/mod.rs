//! Self-optimization driven by the query log.
//!
//! One cycle classifies recent queries, registers an index for every
//! pattern seen more often than the threshold, prunes stale rows and
//! compares recent query latency with the window before it. Only one
//! cycle runs at a time; query results are never affected.

pub mod index;
pub mod patterns;

pub use index::{AppliedIndex, IndexRegistry};
pub use patterns::{count_patterns, QueryPattern};

use crate::core::config::OptimizerConfig;
use crate::core::{Clock, Result, RollupError};
use crate::monitoring::WarehouseCounters;
use crate::query::QueryLog;
use crate::retention::manager::purge_cutoff;
use crate::retention::RetentionManager;
use crate::storage::AggregateStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one optimization cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationSummary {
    pub indexes_created: usize,
    /// Partitions the pruning pass changed
    pub queries_optimized: usize,
    pub rows_pruned: usize,
    /// Percentage drop in mean query duration, recent window vs previous
    pub performance_improvement: f64,
    pub completed_at: DateTime<Utc>,
}

/// Releases the in-progress flag when the cycle ends, including on error.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RollupError::OptimizationInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Optimizer {
    config: OptimizerConfig,
    store: Arc<AggregateStore>,
    log: Arc<QueryLog>,
    retention: Arc<RetentionManager>,
    counters: Arc<WarehouseCounters>,
    clock: Arc<dyn Clock>,
    indexes: IndexRegistry,
    in_progress: AtomicBool,
}

impl Optimizer {
    pub fn new(
        config: OptimizerConfig,
        store: Arc<AggregateStore>,
        log: Arc<QueryLog>,
        retention: Arc<RetentionManager>,
        counters: Arc<WarehouseCounters>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            log,
            retention,
            counters,
            clock,
            indexes: IndexRegistry::new(),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn indexes(&self) -> Vec<AppliedIndex> {
        self.indexes.indexes()
    }

    /// Run one cycle. Fails with `OptimizationInProgress` if another cycle
    /// is active, and with `Cancelled` if `cancel` fires mid-prune.
    pub fn run_cycle(&self, cancel: &CancellationToken) -> Result<OptimizationSummary> {
        let _guard = CycleGuard::acquire(&self.in_progress)?;
        let now = self.clock.now();

        let records = self.log.snapshot();
        let mut indexes_created = 0;
        for (pattern, count) in count_patterns(&records) {
            if count <= self.config.pattern_threshold {
                continue;
            }
            if self.indexes.apply(pattern.clone(), count, now) {
                indexes_created += 1;
                let efficiency = self
                    .counters
                    .raise_index_efficiency(self.config.efficiency_step_percent);
                info!(pattern = %pattern, count, efficiency, "Index created");
            }
        }

        let (queries_optimized, rows_pruned) = self.prune_stale(now, cancel)?;
        let performance_improvement = self.performance_improvement();

        self.counters.set_last_optimization_at(now);
        info!(
            indexes_created,
            queries_optimized,
            rows_pruned,
            performance_improvement,
            "Optimization cycle completed"
        );

        Ok(OptimizationSummary {
            indexes_created,
            queries_optimized,
            rows_pruned,
            performance_improvement,
            completed_at: now,
        })
    }

    /// Prune rows past the optimizer horizon, never earlier than the
    /// metric's retention policy would and never for inactive data types.
    fn prune_stale(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<(usize, usize)> {
        let mut partitions_changed = 0;
        let mut rows_pruned = 0;

        for key in self.store.partition_keys() {
            if cancel.is_cancelled() {
                return Err(RollupError::Cancelled);
            }

            let data_type = self.retention.data_type_for(&key.metric);
            let horizon_days = match self.retention.policy(data_type) {
                Some(policy) if !policy.is_active => continue,
                Some(policy) => self.config.prune_horizon_days.max(policy.purge_after_days),
                None => self.config.prune_horizon_days,
            };

            let cutoff = match purge_cutoff(data_type, now, horizon_days) {
                Ok(cutoff) => cutoff,
                Err(e) => {
                    warn!(partition = %key, error = %e, "Skipping partition prune");
                    continue;
                }
            };

            let removed = self.store.prune_partition(&key, cutoff);
            if removed > 0 {
                partitions_changed += 1;
                rows_pruned += removed;
                debug!(partition = %key, removed, horizon_days, "Pruned stale rows");
            }
        }

        Ok((partitions_changed, rows_pruned))
    }

    /// Percentage drop in mean duration between the latest window and the
    /// one before it; 0 until two full windows have been recorded.
    pub fn performance_improvement(&self) -> f64 {
        improvement(&self.log.durations(), self.config.comparison_window)
    }
}

fn improvement(durations: &[f64], window: usize) -> f64 {
    if window == 0 || durations.len() < window * 2 {
        return 0.0;
    }
    let recent = &durations[durations.len() - window..];
    let previous = &durations[durations.len() - 2 * window..durations.len() - window];

    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let before = mean(previous);
    if before <= 0.0 {
        return 0.0;
    }
    (before - mean(recent)) / before * 100.0
}
