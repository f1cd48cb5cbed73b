//! Retention policies and lifecycle tiers.

use crate::core::{CompressionLevel, Result, RollupError};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical category a metric's samples belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    UserEvents,
    Orders,
    ProductMetrics,
    Financial,
    SystemLogs,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::UserEvents,
        DataType::Orders,
        DataType::ProductMetrics,
        DataType::Financial,
        DataType::SystemLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::UserEvents => "user_events",
            DataType::Orders => "orders",
            DataType::ProductMetrics => "product_metrics",
            DataType::Financial => "financial",
            DataType::SystemLogs => "system_logs",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = RollupError;

    fn from_str(s: &str) -> Result<Self> {
        DataType::ALL
            .into_iter()
            .find(|dt| dt.as_str() == s)
            .ok_or_else(|| RollupError::invalid_policy(format!("unknown data type: {}", s)))
    }
}

/// Where a row sits in its lifecycle, derived from its bucket age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleTier {
    Live,
    Archived,
    Purged,
}

/// Retention rules for one data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub data_type: DataType,
    pub retention_period_days: u32,
    pub archive_after_days: u32,
    pub compression_level: CompressionLevel,
    pub purge_after_days: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl RetentionPolicy {
    /// Create an active policy.
    pub fn new(
        data_type: DataType,
        retention_period_days: u32,
        archive_after_days: u32,
        compression_level: CompressionLevel,
        purge_after_days: u32,
    ) -> Self {
        Self {
            data_type,
            retention_period_days,
            archive_after_days,
            compression_level,
            purge_after_days,
            is_active: true,
        }
    }

    /// The built-in policy table, one entry per data type.
    pub fn defaults() -> Vec<RetentionPolicy> {
        vec![
            Self::new(DataType::UserEvents, 365, 90, CompressionLevel::Medium, 730),
            Self::new(DataType::Orders, 2555, 365, CompressionLevel::Low, 2555),
            Self::new(DataType::ProductMetrics, 730, 180, CompressionLevel::High, 1095),
            Self::new(DataType::Financial, 2555, 365, CompressionLevel::None, 3650),
            Self::new(DataType::SystemLogs, 30, 7, CompressionLevel::High, 90),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if self.archive_after_days >= self.purge_after_days {
            return Err(RollupError::invalid_policy(format!(
                "{}: archive_after_days ({}) must be less than purge_after_days ({})",
                self.data_type, self.archive_after_days, self.purge_after_days
            )));
        }
        if self.retention_period_days > self.purge_after_days {
            return Err(RollupError::invalid_policy(format!(
                "{}: retention_period_days ({}) must not exceed purge_after_days ({})",
                self.data_type, self.retention_period_days, self.purge_after_days
            )));
        }
        Ok(())
    }

    /// Tier for a row whose bucket is `age` old.
    pub fn tier_for_age(&self, age: ChronoDuration) -> LifecycleTier {
        if age >= ChronoDuration::days(i64::from(self.purge_after_days)) {
            LifecycleTier::Purged
        } else if age >= ChronoDuration::days(i64::from(self.archive_after_days)) {
            LifecycleTier::Archived
        } else {
            LifecycleTier::Live
        }
    }
}
