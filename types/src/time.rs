//! Millisecond timestamps.
//!
//! Message timestamps are sender wall-clock milliseconds since the Unix
//! epoch. Receivers never use them for ordering, only for staleness and
//! replay checks, so every liveness/expiry helper takes an explicit `now`
//! — production code passes [`Timestamp::now`], tests drive a virtual clock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// The current wall clock.
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since this timestamp, relative to `now`.
    /// Saturates to zero when `self` is in the future.
    pub fn elapsed_millis(&self, now: Timestamp) -> u64 {
        now.0.saturating_sub(self.0)
    }

    /// Whether `duration_secs` seconds have passed since this timestamp.
    pub fn has_expired(&self, duration_secs: u64, now: Timestamp) -> bool {
        now.0 >= self.0.saturating_add(duration_secs.saturating_mul(1000))
    }

    /// Absolute distance in milliseconds between two timestamps, in either
    /// direction (for replay windows around the local clock).
    pub fn abs_diff_millis(&self, other: Timestamp) -> u64 {
        self.0.abs_diff(other.0)
    }

    pub fn saturating_add_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs.saturating_mul(1000)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
