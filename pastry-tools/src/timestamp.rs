use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch, monotonic enough for the "last heard
/// from" bookkeeping the core tables need. Never compared across nodes for
/// ordering — the version counters in [`crate::TickTask`]'s callers are the
/// only cross-node ordering signal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TimestampDuration(u64);

impl Timestamp {
    pub fn new(v: u64) -> Self {
        Self(v)
    }
    pub fn as_u64(&self) -> u64 {
        self.0
    }
    pub fn saturating_sub(&self, other: Timestamp) -> TimestampDuration {
        TimestampDuration(self.0.saturating_sub(other.0))
    }
}

impl TimestampDuration {
    pub fn new(v: u64) -> Self {
        Self(v)
    }
    pub fn as_u64(&self) -> u64 {
        self.0
    }
    pub fn from_secs(secs: u64) -> Self {
        Self(secs * 1_000_000)
    }
}

/// Current wall-clock time, used only for human-facing bookkeeping
/// ("last heard from this peer N seconds ago"). Never fed into race
/// detection: clocks drift between nodes, version counters don't.
pub fn get_timestamp() -> Timestamp {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp::new(dur.as_micros() as u64)
}
