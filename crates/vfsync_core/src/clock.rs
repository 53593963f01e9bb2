//! Timestamp sources for change metadata.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies wall-clock milliseconds for change timestamps.
///
/// Timestamps are informational (history listings, snapshot stamps). Replay
/// order never depends on them.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The operating system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Keeps stamps monotonic even if the source clock steps backwards or a
/// remote replica runs ahead.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Stamper {
    last_ms: u64,
}

impl Stamper {
    pub(crate) fn tick(&mut self, clock: &dyn Clock) -> u64 {
        self.last_ms = self.last_ms.max(clock.now_ms());
        self.last_ms
    }

    pub(crate) fn receive(&mut self, remote_ms: u64) {
        self.last_ms = self.last_ms.max(remote_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamper_never_goes_back() {
        let clock = ManualClock::new(100);
        let mut stamper = Stamper::default();
        assert_eq!(stamper.tick(&clock), 100);
        stamper.receive(500);
        assert_eq!(stamper.tick(&clock), 500);
        clock.advance(1000);
        assert_eq!(stamper.tick(&clock), 1100);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
