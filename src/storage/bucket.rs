//! Bucket-start canonicalization for every granularity.
//!
//! Minute and hour buckets are zone independent. Day and coarser buckets
//! start at local midnight, where "local" is a fixed UTC offset taken from
//! configuration.

use crate::core::{Granularity, Result, RollupError};
use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveDateTime,
    TimeZone, Timelike, Utc,
};

/// Truncates timestamps to the canonical start of their bucket.
#[derive(Debug, Clone, Copy)]
pub struct BucketCalculator {
    offset: FixedOffset,
}

impl Default for BucketCalculator {
    fn default() -> Self {
        Self::utc()
    }
}

impl BucketCalculator {
    /// Buckets aligned to UTC midnight.
    pub fn utc() -> Self {
        Self {
            offset: FixedOffset::east_opt(0).expect("zero offset is valid"),
        }
    }

    /// Buckets aligned to midnight at the given offset east of UTC.
    pub fn with_offset_minutes(minutes: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
            RollupError::config(format!("invalid UTC offset: {} minutes", minutes))
        })?;
        Ok(Self { offset })
    }

    /// Canonical start of the bucket containing `timestamp`.
    ///
    /// Fails with `InvalidSample` when the bucket start falls outside the
    /// representable date range.
    pub fn bucket_start(
        &self,
        timestamp: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<DateTime<Utc>> {
        let local = timestamp.with_timezone(&self.offset).naive_local();
        let date = local.date();

        let start = match granularity {
            Granularity::Minute => local.with_second(0).and_then(|t| t.with_nanosecond(0)),
            Granularity::Hour => date.and_hms_opt(local.hour(), 0, 0),
            Granularity::Day => midnight(date),
            Granularity::Week => {
                let back = i64::from(date.weekday().num_days_from_sunday());
                date.checked_sub_signed(ChronoDuration::days(back))
                    .and_then(midnight)
            }
            Granularity::Month => first_of_month(date.year(), date.month()),
            Granularity::Quarter => first_of_month(date.year(), (date.month0() / 3) * 3 + 1),
            Granularity::Year => first_of_month(date.year(), 1),
        };

        start
            .and_then(|start| self.offset.from_local_datetime(&start).single())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                RollupError::invalid_sample(format!(
                    "{} bucket for {} is out of range",
                    granularity, timestamp
                ))
            })
    }

    /// Bucket starts for every granularity, finest first. Either every
    /// bucket is computed or none is.
    pub fn fan_out(&self, timestamp: DateTime<Utc>) -> Result<[(Granularity, DateTime<Utc>); 7]> {
        let mut buckets = [(Granularity::Minute, timestamp); 7];
        for (slot, granularity) in buckets.iter_mut().zip(Granularity::ALL) {
            *slot = (granularity, self.bucket_start(timestamp, granularity)?);
        }
        Ok(buckets)
    }
}

fn midnight(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

fn first_of_month(year: i32, month: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, 1).and_then(midnight)
}
