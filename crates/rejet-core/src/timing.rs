//! Time combinators driven by the runtime clock.
//!
//! `delay`, `debounce` and `throttle` read time from a [`Runtime`](crate::Runtime)
//! so they behave identically under a [`ManualClock`](crate::ManualClock) and a
//! real one. `once` and `memoize` need no clock at all.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::runtime::{expect_current_runtime, RuntimeHandle};
use crate::timers::TimerId;

struct DelayState {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

/// Future that resolves once the runtime clock reaches the deadline computed
/// at construction. Dropping it cancels the timer.
#[must_use = "futures do nothing unless awaited"]
pub struct Delay {
    state: Rc<DelayState>,
    runtime: RuntimeHandle,
    timer: Option<TimerId>,
}

impl Delay {
    pub(crate) fn new(runtime: &RuntimeHandle, millis: u64) -> Self {
        let state = Rc::new(DelayState {
            fired: Cell::new(false),
            waker: RefCell::new(None),
        });
        let timer = {
            let state = Rc::clone(&state);
            runtime.register_timer(millis, move || {
                state.fired.set(true);
                let waker = state.waker.borrow_mut().take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            })
        };
        if timer.is_none() {
            log::warn!("delay of {millis}ms resolves immediately: runtime is gone");
            state.fired.set(true);
        }
        Self {
            state,
            runtime: runtime.clone(),
            timer,
        }
    }

    pub fn is_elapsed(&self) -> bool {
        self.state.fired.get()
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.state.fired.get() {
            return Poll::Ready(());
        }
        *self.state.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            if !self.state.fired.get() {
                self.runtime.cancel_timer(timer);
            }
        }
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delay")
            .field("elapsed", &self.is_elapsed())
            .finish()
    }
}

/// Suspends for `millis` on the current runtime.
///
/// # Panics
///
/// Panics when called on a thread without a runtime.
pub fn delay(millis: u64) -> Delay {
    expect_current_runtime("delay").delay(millis)
}

struct DebounceInner<A> {
    runtime: RuntimeHandle,
    millis: u64,
    callback: Rc<dyn Fn(A)>,
    pending: Cell<Option<TimerId>>,
}

/// Trailing-edge debounce: `callback` runs once, `millis` after the most
/// recent call, with that call's argument.
pub struct Debounced<A> {
    inner: Rc<DebounceInner<A>>,
}

impl<A> Clone for Debounced<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A: 'static> Debounced<A> {
    pub fn new(runtime: &RuntimeHandle, millis: u64, callback: impl Fn(A) + 'static) -> Self {
        Self {
            inner: Rc::new(DebounceInner {
                runtime: runtime.clone(),
                millis,
                callback: Rc::new(callback),
                pending: Cell::new(None),
            }),
        }
    }

    pub fn call(&self, args: A) {
        self.cancel();
        let inner = Rc::clone(&self.inner);
        let timer = self.inner.runtime.register_timer(self.inner.millis, move || {
            inner.pending.set(None);
            (inner.callback)(args);
        });
        self.inner.pending.set(timer);
    }

    /// Drops the pending invocation, if any.
    pub fn cancel(&self) {
        if let Some(timer) = self.inner.pending.take() {
            self.inner.runtime.cancel_timer(timer);
        }
    }

    pub fn is_pending(&self) -> bool {
        let timer = self.inner.pending.get();
        timer.is_some()
    }
}

/// Debounces `callback` on the current runtime.
///
/// # Panics
///
/// Panics when called on a thread without a runtime.
pub fn debounce<A: 'static>(millis: u64, callback: impl Fn(A) + 'static) -> Debounced<A> {
    Debounced::new(&expect_current_runtime("debounce"), millis, callback)
}

struct ThrottleInner<A, R> {
    runtime: RuntimeHandle,
    millis: u64,
    callback: Box<dyn Fn(A) -> R>,
    last_fired: Cell<Option<u64>>,
    last_result: RefCell<Option<R>>,
}

/// Leading-edge throttle. The first call fires right away; calls within
/// `millis` of the last firing return the cached result instead.
pub struct Throttled<A, R> {
    inner: Rc<ThrottleInner<A, R>>,
}

impl<A, R> Clone for Throttled<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A: 'static, R: Clone + 'static> Throttled<A, R> {
    pub fn new(runtime: &RuntimeHandle, millis: u64, callback: impl Fn(A) -> R + 'static) -> Self {
        Self {
            inner: Rc::new(ThrottleInner {
                runtime: runtime.clone(),
                millis,
                callback: Box::new(callback),
                last_fired: Cell::new(None),
                last_result: RefCell::new(None),
            }),
        }
    }

    pub fn call(&self, args: A) -> R {
        let now = self.inner.runtime.now_millis();
        let cached = match self.inner.last_fired.get() {
            Some(last) if now < last.saturating_add(self.inner.millis) => {
                self.inner.last_result.borrow().clone()
            }
            _ => None,
        };
        if let Some(result) = cached {
            return result;
        }
        self.inner.last_fired.set(Some(now));
        let result = (self.inner.callback)(args);
        *self.inner.last_result.borrow_mut() = Some(result.clone());
        result
    }
}

/// Throttles `callback` on the current runtime.
///
/// # Panics
///
/// Panics when called on a thread without a runtime.
pub fn throttle<A: 'static, R: Clone + 'static>(
    millis: u64,
    callback: impl Fn(A) -> R + 'static,
) -> Throttled<A, R> {
    Throttled::new(&expect_current_runtime("throttle"), millis, callback)
}

enum OnceState<A, R, E> {
    Fresh(Box<dyn FnOnce(A) -> Result<R, E>>),
    Running,
    Settled(Result<R, E>),
    Poisoned,
}

/// Poisons a `Once` whose function unwinds instead of returning.
struct PoisonOnUnwind<'a, A, R, E>(&'a RefCell<OnceState<A, R, E>>);

impl<A, R, E> Drop for PoisonOnUnwind<'_, A, R, E> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        if let Ok(mut state) = self.0.try_borrow_mut() {
            *state = OnceState::Poisoned;
        }
    }
}

/// Runs its function on the first call only and replays the outcome,
/// success or error, to every later call.
pub struct Once<A, R, E> {
    state: Rc<RefCell<OnceState<A, R, E>>>,
}

impl<A, R, E> Clone for Once<A, R, E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<A: 'static, R: Clone + 'static, E: Clone + 'static> Once<A, R, E> {
    pub fn new(callback: impl FnOnce(A) -> Result<R, E> + 'static) -> Self {
        Self {
            state: Rc::new(RefCell::new(OnceState::Fresh(Box::new(callback)))),
        }
    }

    /// # Panics
    ///
    /// Panics if called again from inside its own function, or after that
    /// function panicked on its first call.
    pub fn call(&self, args: A) -> Result<R, E> {
        let state = std::mem::replace(&mut *self.state.borrow_mut(), OnceState::Running);
        match state {
            OnceState::Fresh(callback) => {
                let _poison = PoisonOnUnwind(&self.state);
                let outcome = callback(args);
                *self.state.borrow_mut() = OnceState::Settled(outcome.clone());
                outcome
            }
            OnceState::Settled(outcome) => {
                *self.state.borrow_mut() = OnceState::Settled(outcome.clone());
                outcome
            }
            OnceState::Running => panic!("once() function re-entered itself"),
            OnceState::Poisoned => {
                *self.state.borrow_mut() = OnceState::Poisoned;
                panic!("once() function panicked on its first call")
            }
        }
    }

    pub fn has_run(&self) -> bool {
        !matches!(*self.state.borrow(), OnceState::Fresh(_))
    }
}

pub fn once<A: 'static, R: Clone + 'static, E: Clone + 'static>(
    callback: impl FnOnce(A) -> Result<R, E> + 'static,
) -> Once<A, R, E> {
    Once::new(callback)
}

/// Caches the most recent argument and its result.
pub struct Memoized<A, R> {
    callback: Box<dyn Fn(&A) -> R>,
    last: RefCell<Option<(A, R)>>,
}

impl<A: PartialEq + 'static, R: Clone + 'static> Memoized<A, R> {
    pub fn new(callback: impl Fn(&A) -> R + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            last: RefCell::new(None),
        }
    }

    pub fn call(&self, args: A) -> R {
        if let Some((last_args, result)) = self.last.borrow().as_ref() {
            if *last_args == args {
                return result.clone();
            }
        }
        let result = (self.callback)(&args);
        *self.last.borrow_mut() = Some((args, result.clone()));
        result
    }
}

pub fn memoize<A: PartialEq + 'static, R: Clone + 'static>(
    callback: impl Fn(&A) -> R + 'static,
) -> Memoized<A, R> {
    Memoized::new(callback)
}

#[cfg(test)]
#[path = "tests/timing_tests.rs"]
mod tests;
