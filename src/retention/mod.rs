//! Retention policies and lifecycle sweeps.
//!
//! Every metric belongs to one data type; each data type carries a policy
//! deciding when its rows are archived and when they are purged.

pub mod manager;
pub mod policy;

pub use manager::{DataTypeSweep, RetentionManager, SweepKind, SweepOutcome, SweepReport};
pub use policy::{DataType, LifecycleTier, RetentionPolicy};
