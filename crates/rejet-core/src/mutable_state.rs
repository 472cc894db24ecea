use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::observable::{Observable, Readable, StateId};
use crate::publisher::{Listener, Publisher, Subscription};
use crate::runtime::{Runtime, RuntimeHandle};

pub(crate) struct MutableStateInner<T: Clone + 'static> {
    id: StateId,
    value: RefCell<T>,
    publisher: Publisher<T>,
    runtime: RuntimeHandle,
}

impl<T: Clone + 'static> MutableStateInner<T> {
    fn new(value: T, runtime: RuntimeHandle) -> Self {
        Self {
            id: StateId::next(),
            value: RefCell::new(value),
            publisher: Publisher::new(),
            runtime,
        }
    }

    /// Queues (or runs) the notification for this cell. The queued closure
    /// reads the value when it runs, so batched writes report the last one.
    fn notify(self: &Rc<Self>) {
        let weak: Weak<Self> = Rc::downgrade(self);
        self.runtime.enqueue_or_dispatch(
            self.id,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let value = inner.value.borrow().clone();
                    inner.publisher.dispatch(&value);
                }
            }),
        );
    }
}

/// Read-only view of a [`MutableState`].
pub struct State<T: Clone + 'static> {
    inner: Rc<MutableStateInner<T>>,
}

/// A valued state cell. Writes that change the value notify subscribers,
/// batched by the runtime's scope when one is entered.
pub struct MutableState<T: Clone + 'static> {
    inner: Rc<MutableStateInner<T>>,
}

impl<T: Clone + 'static> PartialEq for State<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Eq for State<T> {}

impl<T: Clone + 'static> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> PartialEq for MutableState<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Eq for MutableState<T> {}

impl<T: Clone + 'static> Clone for MutableState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> State<T> {
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.inner.value.borrow();
        f(&value)
    }

    pub fn id(&self) -> StateId {
        self.inner.id
    }
}

impl<T: Clone + PartialEq + 'static> MutableState<T> {
    pub fn with_runtime(value: T, runtime: RuntimeHandle) -> Self {
        Self {
            inner: Rc::new(MutableStateInner::new(value, runtime)),
        }
    }

    pub fn as_state(&self) -> State<T> {
        State {
            inner: Rc::clone(&self.inner),
        }
    }

    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.as_state().with(f)
    }

    /// Stores `value` unless it equals the current one.
    pub fn set(&self, value: T) {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return;
            }
            *current = value;
        }
        self.inner.notify();
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = self.with(f);
        self.set(next);
    }

    pub fn id(&self) -> StateId {
        self.inner.id
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.inner.runtime
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.publisher.default_channel().len()
    }
}

impl<T: Clone + 'static> Observable for MutableState<T> {
    type Event = T;

    fn observe(&self, listener: Listener<T>) -> Subscription {
        self.inner.publisher.default_channel().subscribe_rc(listener)
    }
}

impl<T: Clone + PartialEq + 'static> Readable for MutableState<T> {
    type Value = T;

    fn get(&self) -> T {
        MutableState::get(self)
    }

    fn state_id(&self) -> StateId {
        self.inner.id
    }
}

impl<T: Clone + 'static> Observable for State<T> {
    type Event = T;

    fn observe(&self, listener: Listener<T>) -> Subscription {
        self.inner.publisher.default_channel().subscribe_rc(listener)
    }
}

impl<T: Clone + 'static> Readable for State<T> {
    type Value = T;

    fn get(&self) -> T {
        State::get(self)
    }

    fn state_id(&self) -> StateId {
        self.inner.id
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for MutableState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableState")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl Runtime {
    pub fn state<T: Clone + PartialEq + 'static>(&self, value: T) -> MutableState<T> {
        MutableState::with_runtime(value, self.handle())
    }
}

#[cfg(test)]
#[path = "tests/mutable_state_tests.rs"]
mod tests;
