//! The 32-bit tick counter shared by every part of the scheduler.

use std::sync::atomic::{AtomicU32, Ordering};

/// Largest accepted timer period: half the counter range.
///
/// Signed differences between two tick values are only meaningful while their
/// distance stays below `2^31`.
pub const MAX_TICKS: u32 = u32::MAX >> 1;

/// Monotonic tick counter that wraps at `2^32`.
///
/// `tick` may be called from any context, including one that preempts the
/// dispatcher. Readers never observe a torn value.
#[derive(Debug, Default)]
pub struct Clock {
    ticks: AtomicU32,
}

impl Clock {
    /// Creates a clock starting at tick zero.
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a clock starting at an arbitrary tick value.
    pub const fn starting_at(tick: u32) -> Self {
        Clock {
            ticks: AtomicU32::new(tick),
        }
    }

    /// Advances the counter by one tick.
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Advances the counter by `ticks` in a single step.
    pub fn advance(&self, ticks: u32) {
        self.ticks.fetch_add(ticks, Ordering::Relaxed);
    }

    /// Returns the current tick count.
    pub fn now(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Wraparound-safe signed distance from `now` to `tick`.
///
/// Negative or zero means `tick` is at or before `now`.
pub(crate) fn ticks_until(tick: u32, now: u32) -> i32 {
    tick.wrapping_sub(now) as i32
}
