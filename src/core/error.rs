use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RollupError {
    #[error("Invalid time range: start {start} is after end {end}")]
    InvalidRange { start: DateTime<Utc>, end: DateTime<Utc> },

    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Aggregation kind mismatch for metric '{metric}': expected {expected}, got {actual}")]
    AggregationKindMismatch {
        metric: String,
        expected: String,
        actual: String,
    },

    #[error("Durable store write failed: {0}")]
    StoreWrite(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Optimization cycle already in progress")]
    OptimizationInProgress,

    #[error("Lifecycle sweep failed for {data_type}: {message}")]
    Lifecycle { data_type: String, message: String },

    #[error("Invalid retention policy: {0}")]
    InvalidPolicy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for rollup operations
pub type Result<T> = std::result::Result<T, RollupError>;

impl RollupError {
    /// Creates a new sample validation error
    pub fn invalid_sample<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSample(msg.into())
    }

    /// Creates a new durable store write error
    pub fn store_write<S: Into<String>>(msg: S) -> Self {
        Self::StoreWrite(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new retention policy error
    pub fn invalid_policy<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPolicy(msg.into())
    }

    /// Creates a new lifecycle error for one data type
    pub fn lifecycle<D: ToString, S: Into<String>>(data_type: D, msg: S) -> Self {
        Self::Lifecycle {
            data_type: data_type.to_string(),
            message: msg.into(),
        }
    }

    /// Returns true if the caller may retry the operation later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StoreWrite(_) | Self::OptimizationInProgress | Self::Cancelled
        )
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRange { .. }
            | Self::InvalidSample(_)
            | Self::AggregationKindMismatch { .. } => "validation",
            Self::StoreWrite(_) => "durability",
            Self::OptimizationInProgress => "concurrency",
            Self::Lifecycle { .. } => "lifecycle",
            Self::InvalidPolicy(_) | Self::Config(_) => "config",
            Self::BackupNotFound(_) => "not_found",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Join(_) => "async",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_error_creation() {
        let err = RollupError::invalid_sample("metric name is empty");
        assert_eq!(err.to_string(), "Invalid sample: metric name is empty");
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_invalid_range_message() {
        let start = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let err = RollupError::InvalidRange { start, end };
        assert!(err.to_string().starts_with("Invalid time range"));
        assert_eq!(err.category(), "validation");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_recoverability() {
        assert!(RollupError::store_write("disk full").is_recoverable());
        assert!(RollupError::OptimizationInProgress.is_recoverable());
        assert!(!RollupError::config("bad interval").is_recoverable());
        assert!(!RollupError::lifecycle("orders", "clock overflow").is_recoverable());
    }

    #[test]
    fn test_lifecycle_error() {
        let err = RollupError::lifecycle("financial", "cutoff out of range");
        assert_eq!(
            err.to_string(),
            "Lifecycle sweep failed for financial: cutoff out of range"
        );
        assert_eq!(err.category(), "lifecycle");
    }
}
