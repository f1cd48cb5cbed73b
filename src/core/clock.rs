//! Injectable wall-clock source.
//!
//! Bucket ages, retention cutoffs and record timestamps all read the time
//! through [`Clock`] so lifecycle behaviour can be driven deterministically
//! in tests with [`ManualClock`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;

/// Source of the current wall-clock instant.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write() = instant;
    }

    /// Move the clock forward (or backward, for a negative delta).
    pub fn advance(&self, delta: ChronoDuration) {
        let mut now = self.now.write();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
