//! Per-call action context.
//!
//! Every action call gets one [`ActionContext`], shared by all restarts and
//! repeats of that call. It is the body's view of the store: reads, guarded
//! writes, waiting on other sources, time combinators, and the lifecycle
//! channels (`Cancelling`, `Success`, `Error`, `Done`, `Dispose`).
//!
//! Lifecycle listeners live for one run of the body: each run ends by firing
//! `Dispose` and dropping them. The cancelled flag spans the whole call.
//!
//! Cancellation is cooperative. Every wrapped operation checks the cancelled
//! flag first and fails with [`ActionError::Cancelled`]; nothing between two
//! checks is interrupted, except that an in-flight asynchronous body is
//! dropped at its next suspension point.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{self, AbortHandle, FutureExt, LocalBoxFuture};

use crate::error::ActionError;
use crate::mutable_state::MutableState;
use crate::mutators::{Advance, Merge};
use crate::observable::{subscribe_all, Observable, Readable, Trigger};
use crate::publisher::{Channel, Listener, Publisher, Subscription};
use crate::runtime::RuntimeHandle;
use crate::timing::{Debounced, Once, Throttled};

/// Channel names of a context's lifecycle publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Cancelling,
    Success,
    Error,
    Done,
    Dispose,
}

#[derive(Clone, Debug)]
pub enum LifecycleEvent<T> {
    Cancelling,
    Success(T),
    Error(ActionError),
    Done,
    Dispose,
}

struct ContextInner<T> {
    runtime: RuntimeHandle,
    cancelled: Cell<bool>,
    disposed: Cell<bool>,
    publisher: Publisher<LifecycleEvent<T>, Lifecycle>,
    abort: RefCell<Option<AbortHandle>>,
}

pub struct ActionContext<T> {
    inner: Rc<ContextInner<T>>,
}

impl<T> Clone for ActionContext<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> ActionContext<T> {
    pub(crate) fn new(runtime: RuntimeHandle) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                runtime,
                cancelled: Cell::new(false),
                disposed: Cell::new(false),
                publisher: Publisher::new(),
                abort: RefCell::new(None),
            }),
        }
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.inner.runtime
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn check_cancellation(&self) -> Result<(), ActionError> {
        if self.inner.cancelled.get() {
            Err(ActionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Reads any state or computed value. Reads are never guarded.
    pub fn get<S: Readable>(&self, source: &S) -> S::Value {
        source.get()
    }

    pub fn set<V>(&self, state: &MutableState<V>, value: V) -> Result<(), ActionError>
    where
        V: Clone + PartialEq + 'static,
    {
        self.check_cancellation()?;
        state.set(value);
        Ok(())
    }

    pub fn update<V>(
        &self,
        state: &MutableState<V>,
        f: impl FnOnce(&V) -> V,
    ) -> Result<(), ActionError>
    where
        V: Clone + PartialEq + 'static,
    {
        self.check_cancellation()?;
        state.update(f);
        Ok(())
    }

    pub fn merge<V, I>(&self, state: &MutableState<V>, entries: I) -> Result<(), ActionError>
    where
        V: Merge + Clone + PartialEq + 'static,
        I: IntoIterator<Item = (V::Key, V::Value)>,
    {
        self.check_cancellation()?;
        state.merge(entries);
        Ok(())
    }

    pub fn add<V, By>(&self, state: &MutableState<V>, by: By) -> Result<(), ActionError>
    where
        V: Advance<By> + Clone + PartialEq + 'static,
    {
        self.check_cancellation()?;
        state.add(by).map_err(ActionError::failed)
    }

    pub fn call<R>(&self, f: impl FnOnce() -> R) -> Result<R, ActionError> {
        self.check_cancellation()?;
        Ok(f())
    }

    /// Resolves with the next event of `source`, or with
    /// [`ActionError::Cancelled`] if the context is disposed first.
    pub fn watch<S>(&self, source: &S) -> Watch<S::Event>
    where
        S: Observable,
        S::Event: Clone,
    {
        let (sender, receiver) = oneshot::channel();
        let sender = RefCell::new(Some(sender));
        let attached = self.attach(
            true,
            |listener| source.observe(listener),
            move |event: &S::Event| {
                let sender = sender.borrow_mut().take();
                if let Some(sender) = sender {
                    let _ = sender.send(event.clone());
                }
            },
        );
        Watch::new(attached, receiver)
    }

    /// Like [`ActionContext::watch`] over several sources at once. Resolves
    /// with the index of the source that fired first.
    pub fn watch_any(&self, sources: &[&dyn Trigger]) -> Watch<usize> {
        let (sender, receiver) = oneshot::channel();
        let sender = RefCell::new(Some(sender));
        let attached = self.attach(
            true,
            |listener| subscribe_all(sources, Rc::new(move |index: usize| listener(&index))),
            move |index: &usize| {
                let sender = sender.borrow_mut().take();
                if let Some(sender) = sender {
                    let _ = sender.send(*index);
                }
            },
        );
        Watch::new(attached, receiver)
    }

    /// Calls `listener` on every event of `source` until unsubscribed. Events
    /// arriving after cancellation are dropped.
    pub fn when<S: Observable>(
        &self,
        source: &S,
        listener: impl Fn(&S::Event) + 'static,
    ) -> Result<Subscription, ActionError> {
        self.attach(false, |wrapped| source.observe(wrapped), listener)
    }

    /// Calls `listener` on the next event of `source` only. The subscription
    /// is also dropped when the context is disposed.
    pub fn when_once<S: Observable>(
        &self,
        source: &S,
        listener: impl Fn(&S::Event) + 'static,
    ) -> Result<Subscription, ActionError> {
        self.attach(true, |wrapped| source.observe(wrapped), listener)
    }

    pub fn when_any(
        &self,
        sources: &[&dyn Trigger],
        listener: impl Fn(usize) + 'static,
        once: bool,
    ) -> Result<Subscription, ActionError> {
        self.attach(
            once,
            |wrapped| subscribe_all(sources, Rc::new(move |index: usize| wrapped(&index))),
            move |index: &usize| listener(*index),
        )
    }

    fn attach<E: 'static>(
        &self,
        once: bool,
        subscribe: impl FnOnce(Listener<E>) -> Subscription,
        listener: impl Fn(&E) + 'static,
    ) -> Result<Subscription, ActionError> {
        self.check_cancellation()?;

        let links: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));
        let release = {
            let links = Rc::clone(&links);
            move || {
                let links = std::mem::take(&mut *links.borrow_mut());
                for link in links {
                    link.unsubscribe();
                }
            }
        };

        let context: Weak<ContextInner<T>> = Rc::downgrade(&self.inner);
        let source = {
            let release = release.clone();
            subscribe(Rc::new(move |event: &E| {
                let cancelled = context
                    .upgrade()
                    .map_or(true, |context| context.cancelled.get());
                if cancelled {
                    return;
                }
                if once {
                    release();
                }
                listener(event);
            }))
        };
        links.borrow_mut().push(source);

        if once {
            let release = release.clone();
            let on_dispose = self
                .inner
                .publisher
                .channel(Lifecycle::Dispose)
                .subscribe(move |_| release());
            links.borrow_mut().push(on_dispose);
        }

        Ok(Subscription::new(release))
    }

    /// Suspends for `millis`, checking for cancellation before and after.
    pub fn delay(&self, millis: u64) -> LocalBoxFuture<'static, Result<(), ActionError>> {
        if let Err(error) = self.check_cancellation() {
            return future::ready(Err(error)).boxed_local();
        }
        let delay = self.inner.runtime.delay(millis);
        let context = self.clone();
        async move {
            delay.await;
            context.check_cancellation()
        }
        .boxed_local()
    }

    /// Debounced `f` that is skipped if the context was cancelled by the time
    /// it fires.
    pub fn debounce<A: 'static>(
        &self,
        millis: u64,
        f: impl Fn(A) + 'static,
    ) -> Result<Debounced<A>, ActionError> {
        self.check_cancellation()?;
        let context = self.clone();
        Ok(Debounced::new(&self.inner.runtime, millis, move |args| {
            if context.is_cancelled() {
                log::debug!("debounced call skipped: action cancelled");
                return;
            }
            f(args)
        }))
    }

    pub fn throttle<A: 'static, R: Clone + 'static>(
        &self,
        millis: u64,
        f: impl Fn(A) -> R + 'static,
    ) -> Result<Throttled<A, Result<R, ActionError>>, ActionError> {
        self.check_cancellation()?;
        let context = self.clone();
        Ok(Throttled::new(&self.inner.runtime, millis, move |args| {
            context.check_cancellation()?;
            Ok(f(args))
        }))
    }

    pub fn once<A: 'static, R: Clone + 'static>(
        &self,
        f: impl FnOnce(A) -> Result<R, ActionError> + 'static,
    ) -> Result<Once<A, R, ActionError>, ActionError> {
        self.check_cancellation()?;
        let context = self.clone();
        Ok(Once::new(move |args| {
            context.check_cancellation()?;
            f(args)
        }))
    }

    pub fn on_cancelling(&self, f: impl Fn() + 'static) -> Subscription {
        self.channel(Lifecycle::Cancelling).subscribe(move |_| f())
    }

    pub fn on_success(&self, f: impl Fn(&T) + 'static) -> Subscription {
        self.channel(Lifecycle::Success).subscribe(move |event| {
            if let LifecycleEvent::Success(value) = event {
                f(value);
            }
        })
    }

    pub fn on_error(&self, f: impl Fn(&ActionError) + 'static) -> Subscription {
        self.channel(Lifecycle::Error).subscribe(move |event| {
            if let LifecycleEvent::Error(error) = event {
                f(error);
            }
        })
    }

    pub fn on_done(&self, f: impl Fn() + 'static) -> Subscription {
        self.channel(Lifecycle::Done).subscribe(move |_| f())
    }

    pub fn on_dispose(&self, f: impl Fn() + 'static) -> Subscription {
        self.channel(Lifecycle::Dispose).subscribe(move |_| f())
    }

    fn channel(&self, name: Lifecycle) -> Channel<LifecycleEvent<T>> {
        self.inner.publisher.channel(name)
    }

    /// Cancels the running call from inside its body.
    ///
    /// ```ignore
    /// if ctx.get(&query).is_empty() {
    ///     return ctx.cancel();
    /// }
    /// ```
    pub fn cancel<R>(&self) -> Result<R, ActionError> {
        self.request_cancel();
        Err(ActionError::Cancelled)
    }

    pub(crate) fn request_cancel(&self) {
        if self.inner.cancelled.replace(true) {
            return;
        }
        log::debug!("action cancelled");
        self.channel(Lifecycle::Cancelling)
            .dispatch(&LifecycleEvent::Cancelling);
        let abort = self.inner.abort.borrow_mut().take();
        if let Some(abort) = abort {
            abort.abort();
        }
        self.dispose();
    }

    /// Registers the abort handle of the attempt in flight. A context that is
    /// already cancelled aborts it right away.
    pub(crate) fn arm(&self, abort: AbortHandle) {
        if self.is_cancelled() {
            abort.abort();
            return;
        }
        *self.inner.abort.borrow_mut() = Some(abort);
    }

    pub(crate) fn disarm(&self) {
        self.inner.abort.borrow_mut().take();
    }

    pub(crate) fn success(&self, value: &T) {
        self.channel(Lifecycle::Success)
            .dispatch(&LifecycleEvent::Success(value.clone()));
    }

    pub(crate) fn error(&self, error: &ActionError) {
        self.channel(Lifecycle::Error)
            .dispatch(&LifecycleEvent::Error(error.clone()));
    }

    pub(crate) fn done(&self) {
        self.channel(Lifecycle::Done).dispatch(&LifecycleEvent::Done);
    }

    /// Ends one run of the body: fires `Dispose` and drops the lifecycle
    /// listeners the run registered. A later run starts with none.
    pub(crate) fn end_run(&self) {
        if self.is_disposed() {
            return;
        }
        self.channel(Lifecycle::Dispose)
            .dispatch(&LifecycleEvent::Dispose);
        self.inner.publisher.clear();
    }

    /// Fires `Dispose` once and drops every lifecycle listener.
    pub fn dispose(&self) {
        self.end_run();
        self.inner.disposed.set(true);
    }
}

impl<T> fmt::Debug for ActionContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("cancelled", &self.inner.cancelled.get())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

/// Future returned by [`ActionContext::watch`]. Dropping it releases the
/// underlying subscription.
#[must_use = "futures do nothing unless awaited"]
pub struct Watch<E> {
    receiver: Option<oneshot::Receiver<E>>,
    failure: Option<ActionError>,
    subscription: Option<Subscription>,
}

impl<E> Watch<E> {
    fn new(attached: Result<Subscription, ActionError>, receiver: oneshot::Receiver<E>) -> Self {
        match attached {
            Ok(subscription) => Self {
                receiver: Some(receiver),
                failure: None,
                subscription: Some(subscription),
            },
            Err(error) => Self {
                receiver: None,
                failure: Some(error),
                subscription: None,
            },
        }
    }
}

impl<E> Future for Watch<E> {
    type Output = Result<E, ActionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(error) = self.failure.take() {
            return Poll::Ready(Err(error));
        }
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(Err(ActionError::Cancelled));
        };
        match receiver.poll_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(outcome) => {
                self.receiver = None;
                self.subscription = None;
                Poll::Ready(outcome.map_err(|_| ActionError::Cancelled))
            }
        }
    }
}

impl<E> Drop for Watch<E> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
#[path = "tests/context_tests.rs"]
mod tests;
