//! Storage layer for aggregate rows and raw samples.
//!
//! This module provides the in-memory aggregate store, bucket
//! canonicalization, and the seam to the durable raw-sample store.

pub mod aggregate_store;
pub mod bucket;
pub mod durable;
pub mod fake_samples;

// Re-export commonly used types
pub use aggregate_store::{AggregateStore, Partition, PartitionKey, ScanResult, UpsertOutcome};
pub use bucket::BucketCalculator;
pub use durable::{BackupId, BackupInfo, DurableStore, InMemoryDurableStore};
pub use fake_samples::SampleGenerator;
