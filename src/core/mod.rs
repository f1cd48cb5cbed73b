//! Core domain models, configuration and error handling.
//!
//! This module contains the fundamental types shared by ingestion,
//! querying and the lifecycle machinery.

#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigBuilder};
pub use error::{Result, RollupError};
pub use types::{
    AggregateRow, AggregationKind, CompressionLevel, DimensionValue, Dimensions, Granularity,
    MetricSample, RowId, StorageTier,
};
