//! Lock-free idle tuning shared by every stripe worker.
//!
//! Values are stored with `Relaxed` ordering. A worker may observe a stale
//! value for at most one more idle decision after a store; that is accepted
//! behavior, not a race to fix.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Default sleep between idle ticks.
pub const DEFAULT_TICK_WAIT_DURATION: Duration = Duration::from_millis(1);

/// Default number of consecutive no-work ticks before sleeping.
pub const DEFAULT_TICKS_BEFORE_WAIT: u32 = 10;

#[derive(Debug)]
pub(crate) struct TickTuning {
    tick_wait_nanos: AtomicU64,
    ticks_before_wait: AtomicU32,
}

impl TickTuning {
    pub(crate) fn new(tick_wait_duration: Duration, ticks_before_wait: u32) -> Self {
        Self {
            tick_wait_nanos: AtomicU64::new(duration_to_nanos(tick_wait_duration)),
            ticks_before_wait: AtomicU32::new(ticks_before_wait),
        }
    }

    #[inline]
    pub(crate) fn tick_wait_duration(&self) -> Duration {
        Duration::from_nanos(self.tick_wait_nanos.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_tick_wait_duration(&self, duration: Duration) {
        self.tick_wait_nanos
            .store(duration_to_nanos(duration), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn ticks_before_wait(&self) -> u32 {
        self.ticks_before_wait.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_ticks_before_wait(&self, ticks: u32) {
        self.ticks_before_wait.store(ticks, Ordering::Relaxed);
    }
}

impl Default for TickTuning {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_WAIT_DURATION, DEFAULT_TICKS_BEFORE_WAIT)
    }
}

// Saturates at ~584 years.
fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
