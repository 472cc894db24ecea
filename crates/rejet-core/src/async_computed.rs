//! Computed state whose selector may answer with a pending computation.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::future::{FutureExt, LocalBoxFuture, Shared};

use crate::computed::{ComputedCore, Tracker};
use crate::error::SelectorError;
use crate::keyed_cache::ArgKey;
use crate::loadable::Loadable;
use crate::observable::{Observable, Readable, StateId};
use crate::publisher::{Listener, Subscription};
use crate::runtime::{Runtime, RuntimeHandle};

/// What an asynchronous selector hands back.
pub enum Selection<T> {
    Ready(T),
    Pending(LocalBoxFuture<'static, Result<T, SelectorError>>),
}

impl<T> Selection<T> {
    pub fn pending(future: impl Future<Output = Result<T, SelectorError>> + 'static) -> Self {
        Selection::Pending(future.boxed_local())
    }
}

/// A pending selector result. Cloneable; every clone resolves to the same
/// outcome.
pub struct PendingValue<T>(Shared<LocalBoxFuture<'static, Result<T, SelectorError>>>);

impl<T> Clone for PendingValue<T> {
    fn clone(&self) -> Self {
        PendingValue(self.0.clone())
    }
}

impl<T: Clone> Future for PendingValue<T> {
    type Output = Result<T, SelectorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.poll_unpin(cx)
    }
}

impl<T> fmt::Debug for PendingValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PendingValue(..)")
    }
}

/// Synchronous read of an asynchronous computed entry: either a value, or
/// the pending computation itself. The entry's [`Loadable`] says how the
/// pending computation settled.
#[derive(Clone, Debug)]
pub enum Evaluation<T> {
    Ready(T),
    Pending(PendingValue<T>),
}

impl<T: Clone> Evaluation<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Evaluation::Ready(value) => Some(value),
            Evaluation::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Evaluation::Pending(_))
    }

    pub async fn resolve(self) -> Result<T, SelectorError> {
        match self {
            Evaluation::Ready(value) => Ok(value),
            Evaluation::Pending(pending) => pending.await,
        }
    }
}

pub(crate) struct AsyncEntry<T> {
    evaluation: Evaluation<T>,
    loadable: Option<Rc<RefCell<Loadable<T>>>>,
}

type AsyncSelector<T, A> = Rc<dyn Fn(&Tracker<'_>, &A) -> Selection<T>>;

/// Computed state with an asynchronous selector.
pub struct AsyncComputed<T, A = ()> {
    core: Rc<ComputedCore<A, AsyncEntry<T>>>,
    selector: AsyncSelector<T, A>,
}

impl<T, A> Clone for AsyncComputed<T, A> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            selector: Rc::clone(&self.selector),
        }
    }
}

impl<T, A> AsyncComputed<T, A>
where
    T: Clone + 'static,
    A: ArgKey + PartialEq + Clone + 'static,
{
    pub fn with_runtime(
        runtime: RuntimeHandle,
        selector: impl Fn(&Tracker<'_>, &A) -> Selection<T> + 'static,
    ) -> Self {
        Self {
            core: ComputedCore::new(runtime),
            selector: Rc::new(selector),
        }
    }

    fn entry(&self, args: &A) -> Rc<crate::computed::Cached<AsyncEntry<T>>> {
        let selector = Rc::clone(&self.selector);
        let core = Rc::downgrade(&self.core);
        let runtime = self.core.runtime.clone();
        self.core.lookup_or_evaluate(args, move |tracker| {
            match selector(tracker, args) {
                Selection::Ready(value) => AsyncEntry {
                    evaluation: Evaluation::Ready(value),
                    loadable: None,
                },
                Selection::Pending(future) => {
                    let shared = future.shared();
                    let loadable = Rc::new(RefCell::new(Loadable::Loading));
                    settle_when_done(&runtime, core, Rc::downgrade(&loadable), shared.clone());
                    AsyncEntry {
                        evaluation: Evaluation::Pending(PendingValue(shared)),
                        loadable: Some(loadable),
                    }
                }
            }
        })
    }

    pub fn get(&self, args: &A) -> Evaluation<T> {
        self.entry(args).value.evaluation.clone()
    }

    /// Waits for the entry's outcome, evaluating it first when needed.
    pub async fn resolve(&self, args: &A) -> Result<T, SelectorError> {
        self.get(args).resolve().await
    }

    pub fn loadable_for(&self, args: &A) -> Loadable<T> {
        let entry = self.entry(args);
        match (&entry.value.loadable, &entry.value.evaluation) {
            (Some(loadable), _) => loadable.borrow().clone(),
            (None, Evaluation::Ready(value)) => Loadable::HasValue(value.clone()),
            (None, Evaluation::Pending(_)) => Loadable::Loading,
        }
    }

    pub fn id(&self) -> StateId {
        self.core.id
    }

    pub fn epoch(&self) -> u64 {
        self.core.epoch()
    }
}

impl<T: Clone + 'static> AsyncComputed<T, ()> {
    pub fn value(&self) -> Evaluation<T> {
        self.get(&())
    }

    pub fn loadable(&self) -> Loadable<T> {
        self.loadable_for(&())
    }

    /// The default entry's loadable as a readable, observable source, for
    /// bindings and for `watch`.
    pub fn loadable_view(&self) -> LoadableView<T> {
        LoadableView {
            computed: self.clone(),
        }
    }
}

/// Moves the entry's loadable to its settled state once `pending` finishes,
/// unless a newer evaluation has replaced the entry in the meantime.
fn settle_when_done<A, T>(
    runtime: &RuntimeHandle,
    core: Weak<ComputedCore<A, AsyncEntry<T>>>,
    loadable: Weak<RefCell<Loadable<T>>>,
    pending: Shared<LocalBoxFuture<'static, Result<T, SelectorError>>>,
) where
    A: ArgKey + PartialEq + Clone + 'static,
    T: Clone + 'static,
{
    runtime.spawn(async move {
        let outcome = pending.await;
        let Some(loadable) = loadable.upgrade() else {
            log::trace!("discarding settlement of a replaced computed entry");
            return;
        };
        *loadable.borrow_mut() = Loadable::from(outcome);
        if let Some(core) = core.upgrade() {
            core.notify();
        }
    });
}

impl<T: 'static, A> Observable for AsyncComputed<T, A>
where
    A: ArgKey + PartialEq + Clone + 'static,
{
    type Event = ();

    fn observe(&self, listener: Listener<()>) -> Subscription {
        self.core.observe(listener)
    }
}

impl<T: Clone + 'static> Readable for AsyncComputed<T, ()> {
    type Value = Evaluation<T>;

    fn get(&self) -> Evaluation<T> {
        self.value()
    }

    fn state_id(&self) -> StateId {
        self.core.id
    }
}

impl<T, A> fmt::Debug for AsyncComputed<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncComputed")
            .field("id", &self.core.id)
            .finish()
    }
}

/// See [`AsyncComputed::loadable_view`].
pub struct LoadableView<T> {
    computed: AsyncComputed<T, ()>,
}

impl<T> Clone for LoadableView<T> {
    fn clone(&self) -> Self {
        Self {
            computed: self.computed.clone(),
        }
    }
}

impl<T: Clone + 'static> Observable for LoadableView<T> {
    type Event = ();

    fn observe(&self, listener: Listener<()>) -> Subscription {
        self.computed.observe(listener)
    }
}

impl<T: Clone + 'static> Readable for LoadableView<T> {
    type Value = Loadable<T>;

    fn get(&self) -> Loadable<T> {
        self.computed.loadable()
    }

    fn state_id(&self) -> StateId {
        self.computed.core.id
    }
}

impl Runtime {
    pub fn async_computed<T: Clone + 'static>(
        &self,
        selector: impl Fn(&Tracker<'_>) -> Selection<T> + 'static,
    ) -> AsyncComputed<T> {
        AsyncComputed::with_runtime(self.handle(), move |tracker, _: &()| selector(tracker))
    }

    pub fn async_computed_with_args<T, A>(
        &self,
        selector: impl Fn(&Tracker<'_>, &A) -> Selection<T> + 'static,
    ) -> AsyncComputed<T, A>
    where
        T: Clone + 'static,
        A: ArgKey + PartialEq + Clone + 'static,
    {
        AsyncComputed::with_runtime(self.handle(), selector)
    }
}

#[cfg(test)]
#[path = "tests/async_computed_tests.rs"]
mod tests;
