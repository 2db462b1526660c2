// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Software-fed hardware watchdog (§5): the main loop feeds it on every
//! iteration; a missed feed past the timeout triggers a reset.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::Clock;

/// Minimum timeout the watchdog may be configured with.
pub const MIN_WATCHDOG_TIMEOUT_MS: u64 = 60_000;

/// Collaborator that performs the actual reset when the watchdog expires
/// (e.g. `esp_restart`-equivalent). A no-op implementation is provided for
/// host development.
pub trait WatchdogSink: Send + Sync {
    /// Trigger a hard reset. Does not return in a real deployment.
    fn reset(&self);
}

/// A sink that only records that a reset was requested, for host
/// development and tests.
#[derive(Debug, Default)]
pub struct NullWatchdogSink {
    triggered: std::sync::atomic::AtomicBool,
}

impl NullWatchdogSink {
    /// Whether [`WatchdogSink::reset`] has been called.
    pub fn was_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl WatchdogSink for NullWatchdogSink {
    fn reset(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }
}

/// Point-in-time watchdog status for the `watchdog_status` operator command.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogStatus {
    /// Milliseconds since the last feed.
    pub age_ms: u64,
    /// Configured timeout.
    pub timeout_ms: u64,
    /// True if `age_ms >= timeout_ms`.
    pub expired: bool,
}

/// Tracks the time since the main loop last fed the watchdog and triggers
/// `sink.reset()` once the timeout elapses. This is deliberately not an
/// independent timer thread: `check` is driven from the same loop that
/// calls `feed`, matching the spec's framing of the watchdog as a
/// main-loop collaborator rather than an interrupt source.
pub struct Watchdog {
    timeout_ms: u64,
    last_fed_ms: AtomicU64,
    clock: std::sync::Arc<dyn Clock>,
    sink: std::sync::Arc<dyn WatchdogSink>,
}

impl Watchdog {
    /// Build a watchdog with the default (60 s) timeout.
    pub fn new(clock: std::sync::Arc<dyn Clock>, sink: std::sync::Arc<dyn WatchdogSink>) -> Self {
        Self::with_timeout(clock, sink, MIN_WATCHDOG_TIMEOUT_MS)
    }

    /// Build a watchdog with an explicit timeout, clamped to
    /// [`MIN_WATCHDOG_TIMEOUT_MS`].
    pub fn with_timeout(clock: std::sync::Arc<dyn Clock>, sink: std::sync::Arc<dyn WatchdogSink>, timeout_ms: u64) -> Self {
        let now = clock.now_ms();
        Self {
            timeout_ms: timeout_ms.max(MIN_WATCHDOG_TIMEOUT_MS),
            last_fed_ms: AtomicU64::new(now),
            clock,
            sink,
        }
    }

    /// Reset the feed timer. Call once per main-loop iteration.
    pub fn feed(&self) {
        self.last_fed_ms.store(self.clock.now_ms(), Ordering::SeqCst);
    }

    /// Current status, for diagnostics.
    pub fn status(&self) -> WatchdogStatus {
        let now = self.clock.now_ms();
        let last_fed = self.last_fed_ms.load(Ordering::SeqCst);
        let age_ms = now.saturating_sub(last_fed);
        WatchdogStatus {
            age_ms,
            timeout_ms: self.timeout_ms,
            expired: age_ms >= self.timeout_ms,
        }
    }

    /// Check whether the timeout has elapsed since the last feed; if so,
    /// invokes the sink's reset. Call alongside `feed` from the main loop.
    /// Returns whether a reset was triggered.
    pub fn check(&self) -> bool {
        if self.status().expired {
            self.sink.reset();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use std::sync::Arc;

    fn harness(timeout_ms: u64) -> (Arc<TestClock>, Arc<NullWatchdogSink>, Watchdog) {
        let clock = Arc::new(TestClock::new());
        let sink = Arc::new(NullWatchdogSink::default());
        let wd = Watchdog::with_timeout(clock.clone(), sink.clone(), timeout_ms);
        (clock, sink, wd)
    }

    #[test]
    fn test_timeout_is_floored_at_minimum() {
        let (_clock, _sink, wd) = harness(1_000);
        assert_eq!(wd.status().timeout_ms, MIN_WATCHDOG_TIMEOUT_MS);
    }

    #[test]
    fn test_regular_feeds_prevent_reset() {
        let (clock, sink, wd) = harness(MIN_WATCHDOG_TIMEOUT_MS);
        for _ in 0..5 {
            clock.advance(10_000);
            wd.feed();
            assert!(!wd.check());
        }
        assert!(!sink.was_triggered());
    }

    #[test]
    fn test_missed_feed_triggers_reset() {
        let (clock, sink, wd) = harness(MIN_WATCHDOG_TIMEOUT_MS);
        clock.advance(MIN_WATCHDOG_TIMEOUT_MS + 1);
        assert!(wd.check());
        assert!(sink.was_triggered());
    }

    #[test]
    fn test_status_reports_age_and_expiry() {
        let (clock, _sink, wd) = harness(MIN_WATCHDOG_TIMEOUT_MS);
        clock.advance(30_000);
        let status = wd.status();
        assert_eq!(status.age_ms, 30_000);
        assert!(!status.expired);
    }
}
