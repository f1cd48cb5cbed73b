//! Range queries over the aggregate store.

use super::log::{QueryExecutionRecord, QueryLog, TimeRange};
use crate::core::{AggregateRow, Clock, Dimensions, Granularity, Result, RollupError};
use crate::monitoring::WarehouseCounters;
use crate::storage::AggregateStore;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Read-only query path; every call leaves one record in the query log.
pub struct QueryEngine {
    store: Arc<AggregateStore>,
    log: Arc<QueryLog>,
    counters: Arc<WarehouseCounters>,
    clock: Arc<dyn Clock>,
    next_query_id: AtomicU64,
}

impl QueryEngine {
    pub fn new(
        store: Arc<AggregateStore>,
        log: Arc<QueryLog>,
        counters: Arc<WarehouseCounters>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            log,
            counters,
            clock,
            next_query_id: AtomicU64::new(1),
        }
    }

    /// Rows of `metric` at `granularity` with `bucket_start` in
    /// `[start, end]` that match `filter`, ordered by bucket start.
    ///
    /// An unknown metric yields an empty result. Only `start > end` is an
    /// error.
    pub fn query(
        &self,
        metric: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: Option<&Dimensions>,
    ) -> Result<Vec<AggregateRow>> {
        if start > end {
            return Err(RollupError::InvalidRange { start, end });
        }

        let started = Instant::now();
        let scan = self.store.scan(metric, granularity, start, end, filter);
        let elapsed = started.elapsed();

        let query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        let filtered_fields = filter
            .map(|f| f.keys().map(str::to_string).collect())
            .unwrap_or_default();

        self.log.record(QueryExecutionRecord {
            query_id,
            metric: metric.to_string(),
            granularity,
            time_range: TimeRange { start, end },
            filtered_fields,
            execution_duration_ms: elapsed.as_secs_f64() * 1000.0,
            rows_scanned: scan.rows_scanned,
            rows_returned: scan.rows.len(),
            timestamp: self.clock.now(),
        });
        self.counters.record_query(elapsed);

        debug!(
            query_id,
            metric,
            granularity = %granularity,
            rows_scanned = scan.rows_scanned,
            rows_returned = scan.rows.len(),
            "Query executed"
        );
        Ok(scan.rows)
    }

    pub fn log(&self) -> &Arc<QueryLog> {
        &self.log
    }
}
