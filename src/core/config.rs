//! Configuration management for the rollup engine.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument overrides
//! - Validation and defaults

use crate::core::{Result, RollupError};
use crate::retention::{DataType, RetentionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Largest UTC offset accepted for bucket truncation (18 hours).
const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// Complete configuration for the rollup engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Aggregate store configuration
    pub warehouse: WarehouseConfig,
    /// Retention policies and metric classification
    pub retention: RetentionConfig,
    /// Optimization subsystem configuration
    pub optimizer: OptimizerConfig,
    /// Background task configuration
    pub scheduler: SchedulerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Aggregate store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Offset of the "local" zone used for day and coarser buckets
    pub utc_offset_minutes: i32,
    /// Number of query execution records kept for optimization
    pub query_log_capacity: usize,
    /// Size estimate per aggregate row, used for status accounting
    pub estimated_row_bytes: u64,
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// One policy per data type
    pub policies: Vec<RetentionPolicy>,
    /// Explicit metric name to data type mapping
    pub metric_data_types: HashMap<String, DataType>,
    /// Data type for metrics without an explicit mapping
    pub default_data_type: DataType,
}

/// Optimization subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// A query pattern seen more often than this is proposed as an index
    pub pattern_threshold: usize,
    /// Index efficiency gained per created index (percent)
    pub efficiency_step_percent: f64,
    /// Rows older than this are pruned by the optimization pass
    pub prune_horizon_days: u32,
    /// Records per window when comparing recent and previous latency
    pub comparison_window: usize,
}

/// Background task configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run background tasks at all
    pub enabled: bool,
    /// Archival sweep interval
    #[serde(with = "humantime_serde")]
    pub archival_interval: Duration,
    /// Purge sweep interval
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
    /// Compression accounting interval
    #[serde(with = "humantime_serde")]
    pub compression_interval: Duration,
    /// Optimization cycle interval
    #[serde(with = "humantime_serde")]
    pub optimization_interval: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Structured logging format
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            warehouse: WarehouseConfig::default(),
            retention: RetentionConfig::default(),
            optimizer: OptimizerConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        WarehouseConfig {
            utc_offset_minutes: 0,
            query_log_capacity: 1000,
            estimated_row_bytes: 256,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        let metric_data_types = [
            ("revenue", DataType::Financial),
            ("orders", DataType::Orders),
            ("sessions", DataType::UserEvents),
            ("product_views", DataType::ProductMetrics),
        ]
        .into_iter()
        .map(|(metric, data_type)| (metric.to_string(), data_type))
        .collect();

        RetentionConfig {
            policies: RetentionPolicy::defaults(),
            metric_data_types,
            default_data_type: DataType::UserEvents,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            pattern_threshold: 10,
            efficiency_step_percent: 5.0,
            prune_horizon_days: 90,
            comparison_window: 100,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            enabled: true,
            archival_interval: Duration::from_secs(24 * 3600), // daily
            purge_interval: Duration::from_secs(24 * 3600),    // daily
            compression_interval: Duration::from_secs(6 * 3600),
            optimization_interval: Duration::from_secs(3600),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Warehouse validation
        if self.warehouse.query_log_capacity == 0 {
            return Err(RollupError::config("query_log_capacity must be greater than 0"));
        }

        if self.warehouse.estimated_row_bytes == 0 {
            return Err(RollupError::config("estimated_row_bytes must be greater than 0"));
        }

        if self.warehouse.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(RollupError::config(format!(
                "utc_offset_minutes must be within +/-{}, got {}",
                MAX_UTC_OFFSET_MINUTES, self.warehouse.utc_offset_minutes
            )));
        }

        // Retention validation
        let mut seen = HashSet::new();
        for policy in &self.retention.policies {
            policy.validate()?;
            if !seen.insert(policy.data_type) {
                return Err(RollupError::config(format!(
                    "duplicate retention policy for data type '{}'",
                    policy.data_type
                )));
            }
        }

        if !seen.contains(&self.retention.default_data_type) {
            return Err(RollupError::config(format!(
                "default data type '{}' has no retention policy",
                self.retention.default_data_type
            )));
        }

        for (metric, data_type) in &self.retention.metric_data_types {
            if !seen.contains(data_type) {
                return Err(RollupError::config(format!(
                    "metric '{}' maps to data type '{}' which has no retention policy",
                    metric, data_type
                )));
            }
        }

        // Optimizer validation
        if self.optimizer.comparison_window == 0 {
            return Err(RollupError::config("comparison_window must be greater than 0"));
        }

        if !(0.0..=100.0).contains(&self.optimizer.efficiency_step_percent) {
            return Err(RollupError::config(format!(
                "efficiency_step_percent must be between 0 and 100, got {}",
                self.optimizer.efficiency_step_percent
            )));
        }

        // Scheduler validation
        let intervals = [
            ("archival_interval", self.scheduler.archival_interval),
            ("purge_interval", self.scheduler.purge_interval),
            ("compression_interval", self.scheduler.compression_interval),
            ("optimization_interval", self.scheduler.optimization_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(RollupError::config(format!("{} must be greater than 0", name)));
            }
        }

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| RollupError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set the local zone offset used for bucket truncation
    pub fn utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.config.warehouse.utc_offset_minutes = minutes;
        self
    }

    /// Set the query log capacity
    pub fn query_log_capacity(mut self, capacity: usize) -> Self {
        self.config.warehouse.query_log_capacity = capacity;
        self
    }

    /// Replace or add a retention policy
    pub fn retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.config
            .retention
            .policies
            .retain(|p| p.data_type != policy.data_type);
        self.config.retention.policies.push(policy);
        self
    }

    /// Map a metric to a data type
    pub fn metric_data_type(mut self, metric: impl Into<String>, data_type: DataType) -> Self {
        self.config
            .retention
            .metric_data_types
            .insert(metric.into(), data_type);
        self
    }

    /// Enable or disable background tasks
    pub fn scheduler_enabled(mut self, enabled: bool) -> Self {
        self.config.scheduler.enabled = enabled;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
