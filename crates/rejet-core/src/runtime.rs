use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread_local;

use crate::executor::{Executor, TaskId};
use crate::observable::StateId;
use crate::platform::{Clock, DefaultScheduler, ManualClock, RuntimeScheduler};
use crate::scope::{Scope, ScopeGuard};
use crate::timers::{TimerId, TimerQueue};
use crate::timing::Delay;

pub(crate) struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    clock: Arc<dyn Clock>,
    scope: Rc<Scope>,
    executor: Executor,
    timers: RefCell<TimerQueue>,
}

impl RuntimeInner {
    fn new(scheduler: Arc<dyn RuntimeScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            executor: Executor::new(Arc::clone(&scheduler)),
            scheduler,
            clock,
            scope: Rc::new(Scope::new()),
            timers: RefCell::new(TimerQueue::new()),
        }
    }

    fn register_timer(&self, delay_millis: u64, callback: Box<dyn FnOnce() + 'static>) -> TimerId {
        let deadline = self.clock.now_millis().saturating_add(delay_millis);
        let id = self.timers.borrow_mut().insert(deadline, callback);
        self.scheduler.schedule_tick();
        id
    }

    fn cancel_timer(&self, id: TimerId) {
        self.timers.borrow_mut().cancel(id);
    }

    fn pop_due_timer(&self) -> Option<Box<dyn FnOnce() + 'static>> {
        let now = self.clock.now_millis();
        self.timers.borrow_mut().pop_due(now)
    }

    fn spawn(&self, task: impl Future<Output = ()> + 'static) -> TaskId {
        let id = self.executor.insert(Box::pin(task));
        self.executor.schedule(id);
        id
    }
}

/// Owns the batching scope, the local executor and the timer queue that
/// every state, computed value and action created from it shares.
///
/// Nothing here is global: two runtimes on the same thread never see each
/// other's scope, tasks or timers.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>, clock: Arc<dyn Clock>) -> Self {
        let runtime = Self {
            inner: Rc::new(RuntimeInner::new(scheduler, clock)),
        };
        LAST_RUNTIME.with(|slot| *slot.borrow_mut() = Some(runtime.handle()));
        runtime
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(DefaultScheduler), clock)
    }

    /// Runtime on a [`ManualClock`] starting at zero; time only moves when
    /// the host moves it.
    pub fn manual() -> (Self, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (Self::with_clock(clock.clone()), clock)
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    pub fn now_millis(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    /// Fires due timers and polls woken tasks until neither makes progress.
    /// Woken tasks are drained before each timer fires. Returns whether any
    /// work ran.
    pub fn run_until_stalled(&self) -> bool {
        let _active = ActiveRuntimeGuard::push(self.handle());
        let mut progressed = false;
        loop {
            while let Some(id) = self.inner.executor.pop_ready() {
                progressed |= self.inner.executor.poll(id);
            }
            match self.inner.pop_due_timer() {
                Some(callback) => {
                    progressed = true;
                    callback();
                }
                None if self.inner.executor.has_ready() => continue,
                None => break,
            }
        }
        progressed
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.inner.timers.borrow().next_deadline()
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.executor.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    pub fn has_timers(&self) -> bool {
        self.pending_timers() > 0
    }

    pub fn has_ready_tasks(&self) -> bool {
        self.inner.executor.has_ready()
    }

    /// Runs `f` inside a batching frame: state writes made by `f` reach
    /// subscribers once, after `f` returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = self.inner.scope.enter();
        f()
    }

    /// Makes this runtime the ambient one for the free functions
    /// ([`crate::delay`], [`crate::debounce`], [`crate::throttle`]) while
    /// `f` runs.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let _active = ActiveRuntimeGuard::push(self.handle());
        f()
    }

    pub fn scope_depth(&self) -> usize {
        self.inner.scope.depth()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("now_millis", &self.now_millis())
            .field("tasks", &self.pending_tasks())
            .field("timers", &self.pending_timers())
            .field("scope_depth", &self.scope_depth())
            .finish()
    }
}

/// Weak reference to a [`Runtime`]. Every operation degrades to a no-op (or
/// runs inline) once the runtime is gone.
#[derive(Clone)]
pub struct RuntimeHandle(pub(crate) Weak<RuntimeInner>);

impl RuntimeHandle {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn now_millis(&self) -> u64 {
        self.0
            .upgrade()
            .map(|inner| inner.clock.now_millis())
            .unwrap_or(0)
    }

    /// Queues a task; it is first polled on the next
    /// [`Runtime::run_until_stalled`].
    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) -> Option<TaskId> {
        match self.0.upgrade() {
            Some(inner) => Some(inner.spawn(task)),
            None => {
                log::warn!("task dropped: runtime is gone");
                None
            }
        }
    }

    /// Registers a task and polls it once right away, so everything up to
    /// its first suspension point runs on the caller's stack.
    pub fn spawn_eager(&self, task: impl Future<Output = ()> + 'static) -> Option<TaskId> {
        let Some(inner) = self.0.upgrade() else {
            log::warn!("task dropped: runtime is gone");
            return None;
        };
        let _active = ActiveRuntimeGuard::push(self.clone());
        let id = inner.executor.insert(Box::pin(task));
        inner.executor.poll(id);
        Some(id)
    }

    pub fn register_timer(
        &self,
        delay_millis: u64,
        callback: impl FnOnce() + 'static,
    ) -> Option<TimerId> {
        let handle = self.clone();
        self.0.upgrade().map(|inner| {
            inner.register_timer(
                delay_millis,
                Box::new(move || {
                    let _active = ActiveRuntimeGuard::push(handle);
                    callback();
                }),
            )
        })
    }

    pub fn cancel_timer(&self, id: TimerId) {
        if let Some(inner) = self.0.upgrade() {
            inner.cancel_timer(id);
        }
    }

    pub fn delay(&self, millis: u64) -> Delay {
        Delay::new(self, millis)
    }

    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = self.enter_scope();
        f()
    }

    pub fn scope_depth(&self) -> usize {
        self.0
            .upgrade()
            .map(|inner| inner.scope.depth())
            .unwrap_or(0)
    }

    pub(crate) fn enter_scope(&self) -> Option<ScopeGuard> {
        self.0.upgrade().map(|inner| inner.scope.enter())
    }

    pub(crate) fn enqueue_or_dispatch(&self, id: StateId, flush: Box<dyn FnOnce()>) {
        match self.0.upgrade() {
            Some(inner) => inner.scope.enqueue_or_dispatch(id, flush),
            None => flush(),
        }
    }

    pub(crate) fn activate(&self) -> ActiveRuntimeGuard {
        ActiveRuntimeGuard::push(self.clone())
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RuntimeHandle")
            .field(&self.is_alive())
            .finish()
    }
}

impl PartialEq for RuntimeHandle {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

thread_local! {
    static ACTIVE_RUNTIMES: RefCell<Vec<RuntimeHandle>> = const { RefCell::new(Vec::new()) };
    static LAST_RUNTIME: RefCell<Option<RuntimeHandle>> = const { RefCell::new(None) };
}

/// The innermost runtime currently driving code on this thread, falling back
/// to the most recently created one that is still alive.
pub fn current_runtime_handle() -> Option<RuntimeHandle> {
    if let Some(handle) = ACTIVE_RUNTIMES.with(|stack| stack.borrow().last().cloned()) {
        return Some(handle);
    }
    LAST_RUNTIME
        .with(|slot| slot.borrow().clone())
        .filter(RuntimeHandle::is_alive)
}

pub(crate) fn expect_current_runtime(operation: &str) -> RuntimeHandle {
    match current_runtime_handle() {
        Some(handle) => handle,
        None => panic!("{operation} requires an active rejet runtime on this thread"),
    }
}

pub(crate) struct ActiveRuntimeGuard;

impl ActiveRuntimeGuard {
    fn push(handle: RuntimeHandle) -> Self {
        ACTIVE_RUNTIMES.with(|stack| stack.borrow_mut().push(handle));
        ActiveRuntimeGuard
    }
}

impl Drop for ActiveRuntimeGuard {
    fn drop(&mut self) {
        ACTIVE_RUNTIMES.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn timers_fire_only_once_the_clock_reaches_them() {
        let (runtime, clock) = Runtime::manual();
        let fired = Rc::new(Cell::new(0));
        {
            let fired = Rc::clone(&fired);
            runtime
                .handle()
                .register_timer(10, move || fired.set(fired.get() + 1));
        }

        runtime.run_until_stalled();
        assert_eq!(fired.get(), 0);
        assert_eq!(runtime.next_deadline(), Some(10));

        clock.advance(10);
        runtime.run_until_stalled();
        assert_eq!(fired.get(), 1);
        assert_eq!(runtime.pending_timers(), 0);
    }

    #[test]
    fn spawned_tasks_run_on_the_next_drive() {
        let (runtime, _clock) = Runtime::manual();
        let ran = Rc::new(Cell::new(false));
        {
            let ran = Rc::clone(&ran);
            runtime.handle().spawn(async move { ran.set(true) });
        }

        assert!(!ran.get());
        assert!(runtime.run_until_stalled());
        assert!(ran.get());
        assert_eq!(runtime.pending_tasks(), 0);
    }

    #[test]
    fn eager_tasks_run_until_their_first_suspension() {
        let (runtime, clock) = Runtime::manual();
        let steps = Rc::new(RefCell::new(Vec::new()));
        {
            let steps = Rc::clone(&steps);
            let handle = runtime.handle();
            runtime.handle().spawn_eager(async move {
                steps.borrow_mut().push("start");
                handle.delay(5).await;
                steps.borrow_mut().push("resumed");
            });
        }

        assert_eq!(*steps.borrow(), vec!["start"]);
        clock.advance(5);
        runtime.run_until_stalled();
        assert_eq!(*steps.borrow(), vec!["start", "resumed"]);
    }

    #[test]
    fn enter_makes_a_runtime_current() {
        let (first, _) = Runtime::manual();
        let (second, _) = Runtime::manual();

        let inside = first.enter(|| current_runtime_handle());
        assert_eq!(inside, Some(first.handle()));
        assert_eq!(current_runtime_handle(), Some(second.handle()));
    }

    #[test]
    fn batch_defers_flushes_until_the_closure_returns() {
        let (runtime, _) = Runtime::manual();
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = runtime.handle();
        runtime.batch(|| {
            let log = Rc::clone(&log);
            handle.enqueue_or_dispatch(StateId::next(), Box::new(move || log.borrow_mut().push(1)));
            assert_eq!(runtime.scope_depth(), 1);
        });
        assert_eq!(*log.borrow(), vec![1]);
    }
}
