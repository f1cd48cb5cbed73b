//! Rollup - in-process analytics rollup engine.
//!
//! Rollup ingests time-stamped business metric samples, keeps incremental
//! aggregates for every granularity from minute to year, answers range
//! queries over them and manages their lifecycle under per-data-type
//! retention policies.
//!
//! # Architecture
//!
//! - `core`: domain types, configuration, errors and the injectable clock
//! - `storage`: bucket canonicalization, aggregate store, durable-store seam
//! - `query`: range queries and the query-performance log
//! - `retention`: policies and archival/purge/compression sweeps
//! - `optimizer`: query-pattern indexing and stale-row pruning
//! - `monitoring`: counters and the warehouse status reporter
//! - `scheduler`: background tasks
//! - `warehouse`: the engine tying everything together
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use chrono::{Duration, Utc};
//! use rollup_lib::core::{AggregationKind, Granularity, MetricSample};
//! use rollup_lib::{Config, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::new(Config::default())?;
//!     let now = Utc::now();
//!     warehouse.ingest(
//!         MetricSample::new("revenue", 42.0, now, AggregationKind::Sum)
//!             .with_dimension("region", "US"),
//!     )?;
//!     let rows = warehouse.query("revenue", Granularity::Day, now - Duration::days(1), now, None)?;
//!     println!("{} rows", rows.len());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod core;
pub mod monitoring;
pub mod optimizer;
pub mod query;
pub mod retention;
pub mod scheduler;
pub mod storage;
pub mod warehouse;

// Re-export core types for convenience
pub use crate::core::{Config, Result};
pub use crate::warehouse::{RestoreSummary, Warehouse, WarehouseBuilder};
