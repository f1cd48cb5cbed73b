//! Domain types for samples, aggregates and their dimension sets.
//!
//! Dimension sets are kept sorted by key so equality, hashing and
//! ordering are well defined and partitions can use them as map keys.

use crate::core::{Result, RollupError};
use chrono::{DateTime, Days, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Bucket width of an aggregate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    /// Every granularity a sample fans out into, finest first.
    pub const ALL: [Granularity; 7] = [
        Granularity::Minute,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Quarter,
        Granularity::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = RollupError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(Granularity::Minute),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            "quarter" => Ok(Granularity::Quarter),
            "year" => Ok(Granularity::Year),
            other => Err(RollupError::invalid_sample(format!(
                "unknown granularity '{}'",
                other
            ))),
        }
    }
}

/// How samples are folded into a row's running value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggregationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::Sum => "sum",
            AggregationKind::Avg => "avg",
            AggregationKind::Count => "count",
            AggregationKind::Min => "min",
            AggregationKind::Max => "max",
        }
    }

    /// Value of a freshly created row holding a single sample.
    #[inline]
    pub fn initial(&self, sample: f64) -> f64 {
        match self {
            AggregationKind::Count => 1.0,
            _ => sample,
        }
    }

    /// Fold one more sample into `current`, which already covers `count` samples.
    #[inline]
    pub fn fold(&self, current: f64, count: u64, sample: f64) -> f64 {
        match self {
            AggregationKind::Sum => current + sample,
            AggregationKind::Avg => (current * count as f64 + sample) / (count + 1) as f64,
            AggregationKind::Count => (count + 1) as f64,
            AggregationKind::Min => current.min(sample),
            AggregationKind::Max => current.max(sample),
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationKind {
    type Err = RollupError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregationKind::Sum),
            "avg" => Ok(AggregationKind::Avg),
            "count" => Ok(AggregationKind::Count),
            "min" => Ok(AggregationKind::Min),
            "max" => Ok(AggregationKind::Max),
            other => Err(RollupError::invalid_sample(format!(
                "unknown aggregation kind '{}'",
                other
            ))),
        }
    }
}

/// A single dimension value. Numbers compare bit-exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionValue {
    Number(f64),
    Text(String),
}

impl DimensionValue {
    fn rank(&self) -> u8 {
        match self {
            DimensionValue::Number(_) => 0,
            DimensionValue::Text(_) => 1,
        }
    }
}

impl PartialEq for DimensionValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DimensionValue {}

impl PartialOrd for DimensionValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DimensionValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DimensionValue::Number(a), DimensionValue::Number(b)) => a.total_cmp(b),
            (DimensionValue::Text(a), DimensionValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for DimensionValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            DimensionValue::Number(n) => n.to_bits().hash(state),
            DimensionValue::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for DimensionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionValue::Number(n) => write!(f, "{}", n),
            DimensionValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for DimensionValue {
    fn from(value: &str) -> Self {
        DimensionValue::Text(value.to_string())
    }
}

impl From<String> for DimensionValue {
    fn from(value: String) -> Self {
        DimensionValue::Text(value)
    }
}

impl From<f64> for DimensionValue {
    fn from(value: f64) -> Self {
        DimensionValue::Number(value)
    }
}

impl From<i64> for DimensionValue {
    fn from(value: i64) -> Self {
        DimensionValue::Number(value as f64)
    }
}

/// Sorted, key-unique tag set distinguishing otherwise identical buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, DimensionValue>",
    into = "BTreeMap<String, DimensionValue>"
)]
pub struct Dimensions {
    pairs: SmallVec<[(String, DimensionValue); 4]>,
}

impl Dimensions {
    /// An empty dimension set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a repeated key replaces the earlier value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DimensionValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DimensionValue>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.binary_search_by(|(k, _)| k.as_str().cmp(key.as_str())) {
            Ok(idx) => self.pairs[idx].1 = value,
            Err(idx) => self.pairs.insert(idx, (key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&DimensionValue> {
        self.pairs
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|idx| &self.pairs[idx].1)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DimensionValue)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True when every key of `filter` is present here with an equal value.
    pub fn matches(&self, filter: &Dimensions) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.get(key).map_or(false, |v| v == value))
    }
}

impl<K: Into<String>, V: Into<DimensionValue>> FromIterator<(K, V)> for Dimensions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dims = Dimensions::new();
        for (k, v) in iter {
            dims.insert(k, v);
        }
        dims
    }
}

impl From<BTreeMap<String, DimensionValue>> for Dimensions {
    fn from(map: BTreeMap<String, DimensionValue>) -> Self {
        // BTreeMap iteration is already sorted and unique.
        Self {
            pairs: map.into_iter().collect(),
        }
    }
}

impl From<Dimensions> for BTreeMap<String, DimensionValue> {
    fn from(dims: Dimensions) -> Self {
        dims.pairs.into_iter().collect()
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

/// One observation produced by a business event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    pub value: f64,
    #[serde(default)]
    pub dimensions: Dimensions,
    pub aggregation: AggregationKind,
}

impl MetricSample {
    pub fn new(
        metric: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
        aggregation: AggregationKind,
    ) -> Self {
        Self {
            timestamp,
            metric: metric.into(),
            value,
            dimensions: Dimensions::new(),
            aggregation,
        }
    }

    pub fn with_dimension(
        mut self,
        key: impl Into<String>,
        value: impl Into<DimensionValue>,
    ) -> Self {
        self.dimensions.insert(key, value);
        self
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Reject samples that cannot be aggregated.
    pub fn validate(&self) -> Result<()> {
        if self.metric.trim().is_empty() {
            return Err(RollupError::invalid_sample("metric name is empty"));
        }
        if !self.value.is_finite() {
            return Err(RollupError::invalid_sample(format!(
                "value for metric '{}' is not finite: {}",
                self.metric, self.value
            )));
        }
        // Room for a full week back and a day of UTC offset either way, so
        // every granularity's bucket start is representable.
        let date = self.timestamp.date_naive();
        if date.checked_sub_days(Days::new(7)).is_none()
            || date.checked_add_days(Days::new(1)).is_none()
        {
            return Err(RollupError::invalid_sample(format!(
                "timestamp for metric '{}' is out of range: {}",
                self.metric, self.timestamp
            )));
        }
        Ok(())
    }
}

/// Opaque, process-unique aggregate row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row-{:016x}", self.0)
    }
}

/// Compression applied to archived rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    None,
    Low,
    Medium,
    High,
}

impl CompressionLevel {
    /// Fraction of the raw size an archived row occupies at this level.
    pub fn size_factor(&self) -> f64 {
        match self {
            CompressionLevel::None => 1.0,
            CompressionLevel::Low => 0.7,
            CompressionLevel::Medium => 0.5,
            CompressionLevel::High => 0.3,
        }
    }
}

/// Storage tier of a row; affects size accounting only, never values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "tier")]
pub enum StorageTier {
    Live,
    Archived { level: CompressionLevel },
}

impl StorageTier {
    pub fn is_archived(&self) -> bool {
        matches!(self, StorageTier::Archived { .. })
    }
}

/// The unit of stored aggregate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub id: RowId,
    pub metric: String,
    pub granularity: Granularity,
    pub aggregation: AggregationKind,
    pub bucket_start: DateTime<Utc>,
    pub dimensions: Dimensions,
    pub value: f64,
    pub sample_count: u64,
    pub tier: StorageTier,
}

impl AggregateRow {
    /// Fold one sample into this row.
    #[inline]
    pub fn apply(&mut self, sample: f64) {
        self.value = self.aggregation.fold(self.value, self.sample_count, sample);
        self.sample_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_sorted_and_unique() {
        let dims = Dimensions::new()
            .with("region", "US")
            .with("channel", "web")
            .with("region", "EU");

        assert_eq!(dims.len(), 2);
        assert_eq!(dims.keys().collect::<Vec<_>>(), vec!["channel", "region"]);
        assert_eq!(dims.get("region"), Some(&DimensionValue::from("EU")));
    }

    #[test]
    fn test_dimensions_equality_ignores_insert_order() {
        let a = Dimensions::new().with("region", "US").with("tier", 2i64);
        let b = Dimensions::new().with("tier", 2i64).with("region", "US");
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimension_filter_matching() {
        let dims = Dimensions::new().with("region", "US").with("channel", "web");

        assert!(dims.matches(&Dimensions::new()));
        assert!(dims.matches(&Dimensions::new().with("region", "US")));
        assert!(!dims.matches(&Dimensions::new().with("region", "EU")));
        assert!(!dims.matches(&Dimensions::new().with("device", "ios")));
    }

    #[test]
    fn test_number_and_text_values_differ() {
        let numeric = Dimensions::new().with("store", 1i64);
        let text = Dimensions::new().with("store", "1");
        assert_ne!(numeric, text);
        assert!(!numeric.matches(&text));
    }

    #[test]
    fn test_dimensions_serde_as_map() {
        let dims = Dimensions::new().with("region", "US").with("store", 7i64);
        let json = serde_json::to_string(&dims).unwrap();
        assert_eq!(json, r#"{"region":"US","store":7.0}"#);

        let back: Dimensions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dims);
    }

    #[test]
    fn test_aggregation_fold() {
        assert_eq!(AggregationKind::Sum.fold(10.0, 1, 20.0), 30.0);
        assert_eq!(AggregationKind::Avg.fold(4.0, 1, 8.0), 6.0);
        assert_eq!(AggregationKind::Count.fold(1.0, 1, 99.0), 2.0);
        assert_eq!(AggregationKind::Min.fold(5.0, 3, 2.0), 2.0);
        assert_eq!(AggregationKind::Max.fold(5.0, 3, 2.0), 5.0);
        assert_eq!(AggregationKind::Count.initial(42.0), 1.0);
        assert_eq!(AggregationKind::Sum.initial(42.0), 42.0);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Quarter".parse::<Granularity>().unwrap(), Granularity::Quarter);
        assert_eq!("max".parse::<AggregationKind>().unwrap(), AggregationKind::Max);
        assert!("fortnight".parse::<Granularity>().is_err());
        assert!("median".parse::<AggregationKind>().is_err());
    }

    #[test]
    fn test_sample_validation() {
        let now = Utc::now();
        assert!(MetricSample::new("revenue", 1.0, now, AggregationKind::Sum)
            .validate()
            .is_ok());
        assert!(MetricSample::new("", 1.0, now, AggregationKind::Sum)
            .validate()
            .is_err());
        assert!(MetricSample::new("revenue", f64::NAN, now, AggregationKind::Sum)
            .validate()
            .is_err());
        for extreme in [DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC] {
            assert!(MetricSample::new("revenue", 1.0, extreme, AggregationKind::Sum)
                .validate()
                .is_err());
        }
    }
}
