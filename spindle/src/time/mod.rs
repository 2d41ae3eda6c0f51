//! Time sources for the timer heap.
//!
//! The scheduler reads time through the [`TimeSource`] trait at millisecond
//! resolution. [`MonotonicTime`] is the default; [`ManualTime`] only moves
//! when told to, which makes timer behaviour deterministic in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic millisecond clock.
pub trait TimeSource: Send + Sync {
    /// Milliseconds elapsed since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;
}

/// Wall-independent monotonic time, measured from the moment it was created.
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A clock that only advances when [`advance`](Self::advance) is called.
///
/// # Examples
///
/// ```rust
/// use spindle::time::{ManualTime, TimeSource};
///
/// let time = ManualTime::new();
/// time.advance(50);
/// assert_eq!(time.now_ms(), 50);
/// ```
#[derive(Default)]
pub struct ManualTime {
    now: AtomicU64,
}

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::AcqRel);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
