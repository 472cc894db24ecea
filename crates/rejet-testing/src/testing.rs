use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use rejet_core::{ManualClock, Runtime, RuntimeHandle};

/// A [`Runtime`] on virtual time.
///
/// Nothing happens until the test moves the clock: [`TestRuntime::advance`]
/// steps through every timer deadline in order and drains the tasks each
/// one wakes before moving on.
#[derive(Clone)]
pub struct TestRuntime {
    runtime: Runtime,
    clock: Arc<ManualClock>,
}

impl TestRuntime {
    pub fn new() -> Self {
        let (runtime, clock) = Runtime::manual();
        Self { runtime, clock }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.runtime.now_millis()
    }

    pub fn run_until_stalled(&self) -> bool {
        self.runtime.run_until_stalled()
    }

    /// Moves virtual time forward by `millis`, stopping at each timer
    /// deadline on the way.
    pub fn advance(&self, millis: u64) {
        let target = self.now().saturating_add(millis);
        self.run_until_stalled();
        while let Some(deadline) = self.runtime.next_deadline() {
            if deadline > target {
                break;
            }
            log::trace!("advancing to timer deadline {deadline}");
            self.clock.set(deadline);
            self.run_until_stalled();
        }
        self.clock.set(target);
        self.run_until_stalled();
    }

    /// Moves virtual time to `millis` since the runtime started.
    pub fn advance_to(&self, millis: u64) {
        self.advance(millis.saturating_sub(self.now()));
    }

    /// Spawns `future` and returns a slot that holds its output once it
    /// completes.
    pub fn spawn<T: 'static>(&self, future: impl Future<Output = T> + 'static) -> Rc<RefCell<Option<T>>> {
        let slot = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&slot);
        self.handle().spawn(async move {
            let value = future.await;
            *sink.borrow_mut() = Some(value);
        });
        slot
    }

    /// Drives `future` to completion, jumping the clock from deadline to
    /// deadline. Returns `None` if it is still pending once no timer is left.
    pub fn block_on<T: 'static>(&self, future: impl Future<Output = T> + 'static) -> Option<T> {
        let slot = self.spawn(future);
        loop {
            self.run_until_stalled();
            if let Some(value) = slot.borrow_mut().take() {
                return Some(value);
            }
            let deadline = self.runtime.next_deadline()?;
            self.clock.set(deadline);
        }
    }
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRuntime")
            .field("runtime", &self.runtime)
            .finish()
    }
}

/// Routes `log` output through the test harness. Safe to call from every
/// test; only the first call installs the logger.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
