//! The warehouse engine.
//!
//! One [`Warehouse`] per process owns the aggregate store, the policy
//! table, the query log and the counters. The clock and the durable store
//! are injected through [`WarehouseBuilder`].

use crate::core::{
    AggregateRow, Clock, Config, Dimensions, Granularity, MetricSample, Result, RollupError,
    SystemClock,
};
use crate::monitoring::{StatusReporter, WarehouseCounters, WarehouseMetrics};
use crate::optimizer::{AppliedIndex, OptimizationSummary, Optimizer};
use crate::query::{QueryEngine, QueryExecutionRecord, QueryLog};
use crate::retention::{DataType, RetentionManager, RetentionPolicy, SweepReport};
use crate::storage::{
    AggregateStore, BackupId, BackupInfo, BucketCalculator, DurableStore, InMemoryDurableStore,
    UpsertOutcome,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Result of restoring a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub samples_restored: usize,
    pub rows_restored: usize,
    /// Samples the aggregate store refused during replay
    pub samples_rejected: usize,
}

/// Builder for [`Warehouse`].
pub struct WarehouseBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    durable: Option<Arc<dyn DurableStore>>,
}

impl WarehouseBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: None,
            durable: None,
        }
    }

    /// Use `clock` instead of the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use `durable` instead of an in-memory store.
    pub fn durable_store(mut self, durable: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn build(self) -> Result<Warehouse> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let durable = self
            .durable
            .unwrap_or_else(|| Arc::new(InMemoryDurableStore::new()));
        let buckets = BucketCalculator::with_offset_minutes(self.config.warehouse.utc_offset_minutes)?;

        let store = Arc::new(AggregateStore::new());
        let counters = Arc::new(WarehouseCounters::new());
        let query_log = Arc::new(QueryLog::new(self.config.warehouse.query_log_capacity));
        let row_bytes = self.config.warehouse.estimated_row_bytes;
        let retention = Arc::new(RetentionManager::new(&self.config.retention, row_bytes));

        let queries = QueryEngine::new(
            Arc::clone(&store),
            Arc::clone(&query_log),
            Arc::clone(&counters),
            Arc::clone(&clock),
        );
        let optimizer = Optimizer::new(
            self.config.optimizer.clone(),
            Arc::clone(&store),
            Arc::clone(&query_log),
            Arc::clone(&retention),
            Arc::clone(&counters),
            Arc::clone(&clock),
        );
        let reporter = StatusReporter::new(
            Arc::clone(&store),
            Arc::clone(&counters),
            Arc::clone(&clock),
            row_bytes,
        );

        info!(
            utc_offset_minutes = self.config.warehouse.utc_offset_minutes,
            policies = self.config.retention.policies.len(),
            "Warehouse initialized"
        );

        Ok(Warehouse {
            config: self.config,
            clock,
            buckets,
            store,
            durable,
            counters,
            queries,
            retention,
            optimizer,
            reporter,
            ingest_gate: RwLock::new(()),
            shutdown: CancellationToken::new(),
        })
    }
}

/// Analytics rollup engine.
pub struct Warehouse {
    config: Config,
    clock: Arc<dyn Clock>,
    buckets: BucketCalculator,
    store: Arc<AggregateStore>,
    durable: Arc<dyn DurableStore>,
    counters: Arc<WarehouseCounters>,
    queries: QueryEngine,
    retention: Arc<RetentionManager>,
    optimizer: Optimizer,
    reporter: StatusReporter,
    /// Shared by ingests, held exclusively while a restore rebuilds the store
    ingest_gate: RwLock<()>,
    shutdown: CancellationToken,
}

impl Warehouse {
    /// Warehouse with the system clock and an in-memory durable store.
    pub fn new(config: Config) -> Result<Self> {
        WarehouseBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> WarehouseBuilder {
        WarehouseBuilder::new(config)
    }

    /// Ingest one sample into every granularity.
    ///
    /// A durable-store failure is logged and returned as `StoreWrite`, but
    /// the aggregates are updated regardless. Invalid samples are rejected
    /// before anything is written.
    pub fn ingest(&self, sample: MetricSample) -> Result<()> {
        sample.validate()?;
        let buckets = self.buckets.fan_out(sample.timestamp)?;

        let _gate = self.ingest_gate.read();
        self.store.check_kind(&sample.metric, sample.aggregation)?;

        let durable_result = self.durable.append(&sample);
        if let Err(e) = &durable_result {
            self.counters.record_durable_failure();
            warn!(metric = %sample.metric, error = %e, "Raw sample write failed");
        }

        let created = self.aggregate(&sample, &buckets)?;
        self.counters.record_ingest(created);

        durable_result.map_err(|e| match e {
            RollupError::StoreWrite(msg) => RollupError::StoreWrite(msg),
            other => RollupError::store_write(other.to_string()),
        })
    }

    /// Upsert a sample into its precomputed buckets; returns rows created.
    fn aggregate(
        &self,
        sample: &MetricSample,
        buckets: &[(Granularity, DateTime<Utc>)],
    ) -> Result<u64> {
        let mut created = 0;
        for &(granularity, bucket_start) in buckets {
            let outcome = self.store.upsert(
                &sample.metric,
                granularity,
                bucket_start,
                &sample.dimensions,
                sample.value,
                sample.aggregation,
            )?;
            if matches!(outcome, UpsertOutcome::Created(_)) {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Rows of `metric` in `[start, end]` matching `filter`, by bucket start.
    pub fn query(
        &self,
        metric: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: Option<&Dimensions>,
    ) -> Result<Vec<AggregateRow>> {
        self.queries.query(metric, granularity, start, end, filter)
    }

    pub fn get_warehouse_status(&self) -> WarehouseMetrics {
        self.reporter.snapshot()
    }

    pub fn run_optimization_cycle(&self) -> Result<OptimizationSummary> {
        self.optimizer.run_cycle(&self.shutdown)
    }

    pub fn run_archival_sweep(&self) -> SweepReport {
        let report = self
            .retention
            .run_archival_sweep(&self.store, self.clock.now(), &self.shutdown);
        self.apply_ratio(&report);
        report
    }

    pub fn run_purge_sweep(&self) -> SweepReport {
        self.retention
            .run_purge_sweep(&self.store, self.clock.now(), &self.shutdown)
    }

    pub fn run_compression_sweep(&self) -> SweepReport {
        let report = self.retention.run_compression_sweep(&self.store, &self.shutdown);
        self.apply_ratio(&report);
        report
    }

    fn apply_ratio(&self, report: &SweepReport) {
        if let Some(ratio) = report.compression_ratio {
            self.counters.set_compression_ratio(ratio);
        }
    }

    pub fn create_backup(&self) -> Result<BackupInfo> {
        let info = self.durable.create_backup(self.clock.now())?;
        info!(backup = %info.id, samples = info.sample_count, "Backup created");
        Ok(info)
    }

    /// Restore the durable store from `id` and rebuild the aggregates from
    /// the restored samples. On failure the aggregates are left untouched.
    /// Concurrent ingests wait until the rebuild is finished.
    pub fn restore_from_backup(&self, id: &BackupId) -> Result<RestoreSummary> {
        let _gate = self.ingest_gate.write();
        let samples = self.durable.restore_backup(id)?;

        self.store.clear();
        self.counters.reset_activity();

        let mut rejected = 0;
        for sample in &samples {
            let replayed = sample
                .validate()
                .and_then(|()| self.buckets.fan_out(sample.timestamp))
                .and_then(|buckets| {
                    self.store.check_kind(&sample.metric, sample.aggregation)?;
                    self.aggregate(sample, &buckets)
                });
            match replayed {
                Ok(created) => self.counters.record_ingest(created),
                Err(e) => {
                    rejected += 1;
                    warn!(metric = %sample.metric, error = %e, "Skipping sample during restore");
                }
            }
        }
        self.counters
            .set_compression_ratio(self.retention.compression_ratio(&self.store));

        let summary = RestoreSummary {
            samples_restored: samples.len() - rejected,
            rows_restored: self.store.total_rows(),
            samples_rejected: rejected,
        };
        info!(
            backup = %id,
            samples = summary.samples_restored,
            rows = summary.rows_restored,
            rejected,
            "Backup restored"
        );
        Ok(summary)
    }

    pub fn policies(&self) -> Vec<RetentionPolicy> {
        self.retention.policies()
    }

    pub fn update_policy(&self, policy: RetentionPolicy) -> Result<()> {
        self.retention.update_policy(policy)
    }

    pub fn set_policy_active(&self, data_type: DataType, active: bool) -> Result<()> {
        self.retention.set_policy_active(data_type, active)
    }

    pub fn data_type_for(&self, metric: &str) -> DataType {
        self.retention.data_type_for(metric)
    }

    pub fn optimization_running(&self) -> bool {
        self.optimizer.is_running()
    }

    pub fn indexes(&self) -> Vec<AppliedIndex> {
        self.optimizer.indexes()
    }

    pub fn recent_queries(&self) -> Vec<QueryExecutionRecord> {
        self.queries.log().snapshot()
    }

    pub fn store(&self) -> &Arc<AggregateStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Token cancelled on shutdown; sweeps and optimization stop between
    /// partitions once it fires.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        info!("Warehouse shutting down");
        self.shutdown.cancel();
    }
}
