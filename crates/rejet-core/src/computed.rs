//! Memoized derived state with automatic dependency tracking.
//!
//! A computed value keeps one cache entry per argument tuple. Reading a
//! state through the [`Tracker`] handed to the selector subscribes the
//! computed value to it; any change of any dependency drops every entry at
//! once (the epoch moves on) and notifies subscribers with `()`. Entries are
//! rebuilt lazily on the next read.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::collections::map::HashMap;
use crate::keyed_cache::{ArgKey, KeyedCache};
use crate::loadable::Loadable;
use crate::observable::{Observable, Readable, StateId, Trigger};
use crate::publisher::{Listener, Publisher, Subscription};
use crate::runtime::{Runtime, RuntimeHandle};

pub(crate) struct Cached<V> {
    pub(crate) value: V,
    pub(crate) epoch: u64,
}

type Bucket<A, V> = Vec<(A, Rc<Cached<V>>)>;

struct Dependency {
    subscription: Subscription,
    last_read_epoch: u64,
}

trait DependencySink {
    fn track(&self, id: StateId, source: &dyn Trigger);
}

/// Dependency-recording accessor passed to selectors.
pub struct Tracker<'a> {
    sink: &'a dyn DependencySink,
}

impl Tracker<'_> {
    /// Reads `source` and records it as a dependency of the entry being
    /// evaluated.
    pub fn get<S: Readable>(&self, source: &S) -> S::Value {
        self.sink.track(source.state_id(), source);
        source.get()
    }

    /// Reads another computed value for a specific argument tuple.
    pub fn get_with<T, A>(&self, computed: &Computed<T, A>, args: &A) -> T
    where
        T: Clone + 'static,
        A: ArgKey + PartialEq + Clone + 'static,
    {
        self.sink.track(computed.core.id, computed);
        computed.get(args)
    }
}

pub(crate) struct ComputedCore<A, V> {
    pub(crate) id: StateId,
    pub(crate) runtime: RuntimeHandle,
    cache: RefCell<KeyedCache<u64, Bucket<A, V>>>,
    epoch: Cell<u64>,
    dependencies: RefCell<HashMap<StateId, Dependency>>,
    publisher: Publisher<()>,
    this: Weak<Self>,
}

impl<A, V> ComputedCore<A, V>
where
    A: ArgKey + PartialEq + Clone + 'static,
    V: 'static,
{
    pub(crate) fn new(runtime: RuntimeHandle) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: StateId::next(),
            runtime,
            cache: RefCell::new(KeyedCache::new()),
            epoch: Cell::new(0),
            dependencies: RefCell::new(HashMap::default()),
            publisher: Publisher::new(),
            this: this.clone(),
        })
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.get()
    }

    /// The entry for `args` if it was evaluated in the current epoch.
    pub(crate) fn lookup(&self, args: &A) -> Option<Rc<Cached<V>>> {
        let epoch = self.epoch.get();
        let path = args.key_path();
        let cache = self.cache.borrow();
        cache
            .get(&path)?
            .iter()
            .find(|(cached_args, _)| cached_args == args)
            .map(|(_, cached)| Rc::clone(cached))
            .filter(|cached| cached.epoch == epoch)
    }

    pub(crate) fn lookup_or_evaluate(
        &self,
        args: &A,
        evaluate: impl FnOnce(&Tracker<'_>) -> V,
    ) -> Rc<Cached<V>> {
        match self.lookup(args) {
            Some(cached) => cached,
            None => self.evaluate(args, evaluate),
        }
    }

    /// Runs the selector and stores its result. A result whose epoch was
    /// overtaken while it ran is returned but not cached.
    fn evaluate(&self, args: &A, evaluate: impl FnOnce(&Tracker<'_>) -> V) -> Rc<Cached<V>> {
        let epoch = self.epoch.get();
        let value = evaluate(&Tracker { sink: self });
        let cached = Rc::new(Cached { value, epoch });

        if self.epoch.get() == epoch {
            let path = args.key_path();
            let replaced = {
                let mut cache = self.cache.borrow_mut();
                let bucket = cache.get_or_insert_with(&path, Vec::new);
                match bucket.iter_mut().find(|(cached_args, _)| cached_args == args) {
                    Some(slot) => Some(std::mem::replace(&mut slot.1, Rc::clone(&cached))),
                    None => {
                        bucket.push((args.clone(), Rc::clone(&cached)));
                        None
                    }
                }
            };
            drop(replaced);
        }
        self.prune_dependencies();
        cached
    }

    /// Drops subscriptions to states no live entry read. Every cached entry
    /// belongs to the current epoch, so anything last read before it is
    /// unneeded.
    fn prune_dependencies(&self) {
        let epoch = self.epoch.get();
        let stale: Vec<Subscription> = {
            let mut dependencies = self.dependencies.borrow_mut();
            let ids: Vec<StateId> = dependencies
                .iter()
                .filter(|(_, dependency)| dependency.last_read_epoch < epoch)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| dependencies.remove(&id))
                .map(|dependency| dependency.subscription)
                .collect()
        };
        for subscription in stale {
            subscription.unsubscribe();
        }
    }

    fn invalidate(&self) {
        self.epoch.set(self.epoch.get() + 1);
        let previous = std::mem::take(&mut *self.cache.borrow_mut());
        drop(previous);
        log::trace!("computed {:?} invalidated, epoch {}", self.id, self.epoch.get());
        self.publisher.dispatch(&());
    }

    /// Notifies subscribers through the runtime scope.
    pub(crate) fn notify(&self) {
        let weak = self.this.clone();
        self.runtime.enqueue_or_dispatch(
            self.id,
            Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.publisher.dispatch(&());
                }
            }),
        );
    }

    pub(crate) fn observe(&self, listener: Listener<()>) -> Subscription {
        self.publisher.default_channel().subscribe_rc(listener)
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.dependencies.borrow().len()
    }
}

impl<A, V> DependencySink for ComputedCore<A, V>
where
    A: ArgKey + PartialEq + Clone + 'static,
    V: 'static,
{
    fn track(&self, id: StateId, source: &dyn Trigger) {
        let epoch = self.epoch.get();
        if let Some(dependency) = self.dependencies.borrow_mut().get_mut(&id) {
            dependency.last_read_epoch = epoch;
            return;
        }
        let weak = self.this.clone();
        let subscription = source.observe_trigger(Rc::new(move || {
            if let Some(core) = weak.upgrade() {
                core.invalidate();
            }
        }));
        self.dependencies.borrow_mut().insert(
            id,
            Dependency {
                subscription,
                last_read_epoch: epoch,
            },
        );
    }
}

type Selector<T, A> = Rc<dyn Fn(&Tracker<'_>, &A) -> T>;

/// Synchronous computed state.
pub struct Computed<T, A = ()> {
    pub(crate) core: Rc<ComputedCore<A, T>>,
    selector: Selector<T, A>,
}

impl<T, A> Clone for Computed<T, A> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            selector: Rc::clone(&self.selector),
        }
    }
}

impl<T, A> Computed<T, A>
where
    T: Clone + 'static,
    A: ArgKey + PartialEq + Clone + 'static,
{
    pub fn with_runtime(
        runtime: RuntimeHandle,
        selector: impl Fn(&Tracker<'_>, &A) -> T + 'static,
    ) -> Self {
        Self {
            core: ComputedCore::new(runtime),
            selector: Rc::new(selector),
        }
    }

    pub fn get(&self, args: &A) -> T {
        let selector = Rc::clone(&self.selector);
        self.core
            .lookup_or_evaluate(args, |tracker| selector(tracker, args))
            .value
            .clone()
    }

    /// Always `HasValue`: a synchronous selector never leaves an entry
    /// loading.
    pub fn loadable_for(&self, args: &A) -> Loadable<T> {
        Loadable::HasValue(self.get(args))
    }

    pub fn id(&self) -> StateId {
        self.core.id
    }

    pub fn epoch(&self) -> u64 {
        self.core.epoch()
    }

    pub fn dependency_count(&self) -> usize {
        self.core.dependency_count()
    }
}

impl<T: Clone + 'static> Computed<T, ()> {
    pub fn value(&self) -> T {
        self.get(&())
    }

    pub fn loadable(&self) -> Loadable<T> {
        self.loadable_for(&())
    }
}

impl<T: 'static, A: 'static> Observable for Computed<T, A>
where
    A: ArgKey + PartialEq + Clone,
{
    type Event = ();

    fn observe(&self, listener: Listener<()>) -> Subscription {
        self.core.observe(listener)
    }
}

impl<T: Clone + 'static> Readable for Computed<T, ()> {
    type Value = T;

    fn get(&self) -> T {
        self.value()
    }

    fn state_id(&self) -> StateId {
        self.core.id
    }
}

impl<T, A> fmt::Debug for Computed<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.core.id)
            .field("epoch", &self.core.epoch.get())
            .finish()
    }
}

impl Runtime {
    pub fn computed<T: Clone + 'static>(
        &self,
        selector: impl Fn(&Tracker<'_>) -> T + 'static,
    ) -> Computed<T> {
        Computed::with_runtime(self.handle(), move |tracker, _: &()| selector(tracker))
    }

    pub fn computed_with_args<T, A>(
        &self,
        selector: impl Fn(&Tracker<'_>, &A) -> T + 'static,
    ) -> Computed<T, A>
    where
        T: Clone + 'static,
        A: ArgKey + PartialEq + Clone + 'static,
    {
        Computed::with_runtime(self.handle(), selector)
    }
}

#[cfg(test)]
#[path = "tests/computed_tests.rs"]
mod tests;
