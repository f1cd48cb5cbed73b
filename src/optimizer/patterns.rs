//! Coarse classification of recorded queries.

use crate::query::QueryExecutionRecord;
use chrono::Duration as ChronoDuration;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Queries spanning at least this many days count as whole-metric scans.
const METRIC_ONLY_SPAN_DAYS: i64 = 365;

/// Shape of a query, as far as indexing is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryPattern {
    /// Filtered on these dimension keys (sorted).
    DimensionFiltered(Vec<String>),
    /// Unfiltered scan over most of a metric's history.
    MetricOnly,
    /// Unfiltered bounded time range.
    TimestampRange,
}

impl QueryPattern {
    pub fn classify(record: &QueryExecutionRecord) -> Self {
        if !record.filtered_fields.is_empty() {
            let mut fields = record.filtered_fields.clone();
            fields.sort();
            fields.dedup();
            return QueryPattern::DimensionFiltered(fields);
        }
        if record.time_range.span() >= ChronoDuration::days(METRIC_ONLY_SPAN_DAYS) {
            QueryPattern::MetricOnly
        } else {
            QueryPattern::TimestampRange
        }
    }
}

impl fmt::Display for QueryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPattern::DimensionFiltered(fields) => {
                write!(f, "dimension-filtered:{}", fields.join(","))
            }
            QueryPattern::MetricOnly => f.write_str("metric-only"),
            QueryPattern::TimestampRange => f.write_str("timestamp-range"),
        }
    }
}

impl Serialize for QueryPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Occurrences of each pattern across `records`.
pub fn count_patterns<'a>(
    records: impl IntoIterator<Item = &'a QueryExecutionRecord>,
) -> BTreeMap<QueryPattern, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(QueryPattern::classify(record)).or_insert(0) += 1;
    }
    counts
}
