//! Bounded log of query executions.
//!
//! Keeps the most recent N records; pushing into a full log evicts the
//! oldest one. The log only feeds the optimizer and is never persisted.

use crate::core::Granularity;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Inclusive time range of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn span(&self) -> ChronoDuration {
        self.end - self.start
    }
}

/// Execution metadata of one query call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExecutionRecord {
    pub query_id: u64,
    pub metric: String,
    pub granularity: Granularity,
    pub time_range: TimeRange,
    /// Dimension keys the query filtered on, sorted
    pub filtered_fields: Vec<String>,
    pub execution_duration_ms: f64,
    pub rows_scanned: usize,
    pub rows_returned: usize,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity ring of recent query executions.
#[derive(Debug)]
pub struct QueryLog {
    records: Mutex<VecDeque<QueryExecutionRecord>>,
    capacity: usize,
}

impl QueryLog {
    /// Create a new log with the specified capacity
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a record, evicting the oldest one when full.
    pub fn record(&self, record: QueryExecutionRecord) {
        let mut records = self.records.lock();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Copy of all records, oldest first.
    pub fn snapshot(&self) -> Vec<QueryExecutionRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Execution durations (ms), oldest first.
    pub fn durations(&self) -> Vec<f64> {
        self.records
            .lock()
            .iter()
            .map(|r| r.execution_duration_ms)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}
