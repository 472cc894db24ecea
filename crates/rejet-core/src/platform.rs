//! Platform abstraction traits for the rejet runtime.
//!
//! These traits allow the runtime to delegate wake-ups and time keeping to
//! the host, so the same store can be driven by a real event loop, a test
//! harness with virtual time, or anything in between.

use std::sync::atomic::{AtomicU64, Ordering};

/// Notifies the host that the runtime has work to do.
///
/// Implementations must be safe to use from multiple threads because task
/// wakers may be cloned and invoked anywhere, even though the runtime itself
/// only ever runs on one thread.
pub trait RuntimeScheduler: Send + Sync {
    /// Request that the host drive the runtime again soon
    /// (see [`crate::Runtime::run_until_stalled`]).
    fn schedule_tick(&self);
}

/// Provides timing information for the runtime.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since an arbitrary, fixed origin.
    ///
    /// Must be monotonic: timers are ordered by this value.
    fn now_millis(&self) -> u64;
}

/// Scheduler that ignores wake-up requests. Hosts that poll the runtime in a
/// loop do not need to be told when work arrives.
#[derive(Debug, Default)]
pub struct DefaultScheduler;

impl RuntimeScheduler for DefaultScheduler {
    fn schedule_tick(&self) {}
}

/// Clock whose time only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(millis: u64) -> Self {
        Self {
            now: AtomicU64::new(millis),
        }
    }

    /// Moves time forward. Moving backwards is ignored so the clock stays
    /// monotonic.
    pub fn set(&self, millis: u64) {
        self.now.fetch_max(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
