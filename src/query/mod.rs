//! Query engine and query-performance log.
//!
//! Queries are served entirely from the in-memory aggregates. Every call
//! is recorded in a bounded log that feeds the optimizer.

pub mod engine;
pub mod log;

pub use engine::QueryEngine;
pub use log::{QueryExecutionRecord, QueryLog, TimeRange};
