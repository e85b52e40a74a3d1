//! Injected time source.
//!
//! Hold durations and heartbeat gaps are measured on the monotonic axis only.
//! Wall time is recorded for forensic timestamps and never drives a decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Arrival stamp of a human signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStamp {
    /// Milliseconds on the clock's monotonic axis.
    pub monotonic_ms: u64,
    /// Wall-clock time, for records only.
    pub wall: DateTime<Utc>,
}

/// Time source injected into every time-sensitive component.
pub trait Clock: Send + Sync {
    /// Monotonic milliseconds since an arbitrary, fixed origin.
    fn monotonic_ms(&self) -> u64;

    /// Current wall-clock time.
    fn wall(&self) -> DateTime<Utc>;

    fn stamp(&self) -> SignalStamp {
        SignalStamp {
            monotonic_ms: self.monotonic_ms(),
            wall: self.wall(),
        }
    }
}

/// Host clock backed by `std::time::Instant`.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Simulated clock advanced explicitly by tests and replays.
///
/// Wall time is derived from a fixed epoch plus the monotonic offset, so a
/// replay with the same advances produces the same timestamps.
pub struct ManualClock {
    now_ms: AtomicU64,
    epoch: DateTime<Utc>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn starting_at(epoch: DateTime<Utc>) -> Self {
        Self {
            now_ms: AtomicU64::new(0),
            epoch,
        }
    }

    /// Move the clock forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::AcqRel);
    }

    /// Jump to an absolute monotonic reading. Never moves backwards.
    pub fn set(&self, ms: u64) {
        self.now_ms.fetch_max(ms, Ordering::AcqRel);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn monotonic_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Acquire)
    }

    fn wall(&self) -> DateTime<Utc> {
        self.epoch + Duration::milliseconds(self.monotonic_ms() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.monotonic_ms(), 0);
        clock.advance(399);
        clock.advance(1);
        assert_eq!(clock.monotonic_ms(), 400);
    }

    #[test]
    fn manual_clock_never_moves_backwards() {
        let clock = ManualClock::new();
        clock.set(1_000);
        clock.set(10);
        assert_eq!(clock.monotonic_ms(), 1_000);
    }

    #[test]
    fn manual_wall_tracks_offset() {
        let clock = ManualClock::new();
        clock.advance(1_500);
        let stamp = clock.stamp();
        assert_eq!(stamp.monotonic_ms, 1_500);
        assert_eq!(stamp.wall.timestamp_millis(), 1_500);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic_ms();
        let b = clock.monotonic_ms();
        assert!(b >= a);
    }
}
