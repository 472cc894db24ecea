//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `rejet-core`. Applications construct a
//! [`StdRuntime`], build their state and actions from
//! [`StdRuntime::runtime`], and drive it with [`StdRuntime::block_on`],
//! [`StdRuntime::run_until_idle`] or [`StdRuntime::run_for`].

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rejet_core::{Clock, Runtime, RuntimeError, RuntimeHandle, RuntimeScheduler};

/// Scheduler that parks the driving thread until work is requested.
pub struct StdScheduler {
    tick_requested: Mutex<bool>,
    wakeup: Condvar,
    tick_waker: Mutex<Option<Arc<dyn Fn() + Send + Sync + 'static>>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            tick_requested: Mutex::new(false),
            wakeup: Condvar::new(),
            tick_waker: Mutex::new(None),
        }
    }

    /// Returns whether a tick has been requested since the last call.
    pub fn take_tick_request(&self) -> bool {
        let mut requested = self
            .tick_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *requested, false)
    }

    /// Registers a waker that will be invoked whenever a new tick is scheduled.
    pub fn set_tick_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self
            .tick_waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    /// Clears any registered tick waker.
    pub fn clear_tick_waker(&self) {
        *self
            .tick_waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Blocks until a tick is requested or `timeout` elapses. Returns whether
    /// a tick was requested, consuming the request.
    pub fn wait_for_tick(&self, timeout: Option<Duration>) -> bool {
        let requested = self
            .tick_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut requested = match timeout {
            Some(timeout) => {
                self.wakeup
                    .wait_timeout_while(requested, timeout, |requested| !*requested)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .wakeup
                .wait_while(requested, |requested| !*requested)
                .unwrap_or_else(PoisonError::into_inner),
        };
        std::mem::replace(&mut *requested, false)
    }

    fn wake(&self) {
        let waker = self
            .tick_waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requested = *self
            .tick_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("StdScheduler")
            .field("tick_requested", &requested)
            .finish()
    }
}

impl RuntimeScheduler for StdScheduler {
    fn schedule_tick(&self) {
        *self
            .tick_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        self.wakeup.notify_all();
        self.wake();
    }
}

/// Clock implementation backed by [`std::time::Instant`], counting from the
/// moment it was created.
#[derive(Debug, Clone)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Returns the elapsed time as a [`Duration`] for convenience.
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Convenience container bundling the standard scheduler and clock.
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Arc<StdScheduler>,
    clock: Arc<StdClock>,
    runtime: Runtime,
    stopped: Arc<AtomicBool>,
}

impl StdRuntime {
    /// Creates a new standard runtime instance.
    pub fn new() -> Self {
        let scheduler = Arc::new(StdScheduler::default());
        let clock = Arc::new(StdClock::default());
        let runtime = Runtime::new(scheduler.clone(), clock.clone());
        Self {
            scheduler,
            clock,
            runtime,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the [`rejet_core::Runtime`] driven by this instance.
    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    /// Returns a handle to the runtime.
    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    /// Returns the scheduler implementation.
    pub fn scheduler(&self) -> Arc<StdScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Returns the clock implementation.
    pub fn clock(&self) -> Arc<StdClock> {
        Arc::clone(&self.clock)
    }

    /// Registers a waker to be called when the runtime requests a tick.
    pub fn set_tick_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.scheduler.set_tick_waker(waker);
    }

    /// Clears any previously registered tick waker.
    pub fn clear_tick_waker(&self) {
        self.scheduler.clear_tick_waker();
    }

    /// Makes [`StdRuntime::run_until_idle`] return at its next wake-up.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.scheduler.schedule_tick();
    }

    /// Drives the runtime until no task is ready and no timer is pending,
    /// sleeping until the next timer deadline in between.
    pub fn run_until_idle(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        loop {
            self.runtime.run_until_stalled();
            if self.stopped.load(Ordering::SeqCst) {
                log::debug!("runtime stopped");
                return;
            }
            match self.runtime.next_deadline() {
                Some(deadline) => {
                    self.park_until(deadline);
                }
                None => return,
            }
        }
    }

    /// Drives the runtime for `duration` of wall-clock time.
    pub fn run_for(&self, duration: Duration) {
        let until = self
            .clock
            .now_millis()
            .saturating_add(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        loop {
            self.runtime.run_until_stalled();
            let now = self.clock.now_millis();
            if now >= until {
                return;
            }
            let wake_at = self
                .runtime
                .next_deadline()
                .map_or(until, |deadline| deadline.min(until));
            self.park_until(wake_at);
        }
    }

    /// Runs `future` to completion on the runtime, driving timers and other
    /// tasks while it is pending.
    ///
    /// Fails with [`RuntimeError::Stalled`] when the future is pending and
    /// nothing is left that could wake it: no timer and no ready task.
    pub fn block_on<T: 'static>(
        &self,
        future: impl Future<Output = T> + 'static,
    ) -> Result<T, RuntimeError> {
        let output: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        {
            let output = Rc::clone(&output);
            self.runtime
                .handle()
                .spawn(async move {
                    let value = future.await;
                    *output.borrow_mut() = Some(value);
                })
                .ok_or(RuntimeError::Dropped)?;
        }
        loop {
            self.runtime.run_until_stalled();
            if let Some(value) = output.borrow_mut().take() {
                return Ok(value);
            }
            if self.scheduler.take_tick_request() && self.runtime.has_ready_tasks() {
                continue;
            }
            match self.runtime.next_deadline() {
                Some(deadline) => self.park_until(deadline),
                None => {
                    log::warn!(
                        "block_on stalled with {} pending task(s)",
                        self.runtime.pending_tasks()
                    );
                    return Err(RuntimeError::Stalled);
                }
            }
        }
    }

    fn park_until(&self, deadline: u64) {
        let now = self.clock.now_millis();
        if deadline <= now {
            return;
        }
        let timeout = Duration::from_millis(deadline - now);
        log::trace!("parking for {timeout:?}");
        self.scheduler.wait_for_tick(Some(timeout));
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}
