//! Millisecond timestamps with saturating arithmetic

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A point in time, in milliseconds since the Unix epoch
///
/// `Timestamp::MAX` stands for "never" (+infinity) and all arithmetic
/// saturates, so `MAX + anything` stays `MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The earliest representable instant, used as "re-evaluate immediately"
    pub const ZERO: Timestamp = Timestamp(0);

    /// +infinity
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    /// Create a timestamp from milliseconds since the epoch
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the epoch
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Whether this is +infinity
    pub const fn is_max(self) -> bool {
        self.0 == i64::MAX
    }

    /// Add a number of milliseconds, saturating at the bounds
    pub fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Subtract a number of milliseconds, saturating at the bounds
    ///
    /// +infinity minus a finite amount is still +infinity.
    pub fn minus_millis(self, millis: i64) -> Self {
        if self.is_max() {
            return self;
        }
        Self(self.0.saturating_sub(millis))
    }

    /// Add a duration, saturating
    pub fn plus(self, duration: Duration) -> Self {
        self.plus_millis(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
    }

    /// Subtract a duration, saturating
    pub fn minus(self, duration: Duration) -> Self {
        self.minus_millis(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
    }

    /// Duration from `earlier` to `self`, zero if `earlier` is later
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        let millis = self.0.saturating_sub(earlier.0);
        Duration::from_millis(u64::try_from(millis).unwrap_or(0))
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Convert to a chrono UTC datetime, None for +infinity or out-of-range values
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        if self.is_max() {
            return None;
        }
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            write!(f, "never")
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}
