use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::publisher::{Listener, Subscription};

static NEXT_STATE_ID: AtomicUsize = AtomicUsize::new(1);

/// Identity of a state cell. Allocated once per cell and never reused, so a
/// dropped state can never be mistaken for a newer one.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct StateId(usize);

impl StateId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Something that emits events: states, computed values and actions.
pub trait Observable {
    type Event: 'static;

    fn observe(&self, listener: Listener<Self::Event>) -> Subscription;

    fn subscribe(&self, listener: impl Fn(&Self::Event) + 'static) -> Subscription
    where
        Self: Sized,
    {
        self.observe(Rc::new(listener))
    }
}

/// An observable with a current value that computed selectors can depend on.
pub trait Readable: Observable {
    type Value;

    fn get(&self) -> Self::Value;

    fn state_id(&self) -> StateId;
}

/// Payload-erased view of an [`Observable`], used where sources of different
/// event types are waited on together.
pub trait Trigger {
    fn observe_trigger(&self, listener: Rc<dyn Fn()>) -> Subscription;
}

impl<S: Observable> Trigger for S {
    fn observe_trigger(&self, listener: Rc<dyn Fn()>) -> Subscription {
        self.observe(Rc::new(move |_: &S::Event| listener()))
    }
}

/// Subscribes `listener` to every source, returning one handle for all of
/// them. The listener receives the index of the source that fired.
pub fn subscribe_all(sources: &[&dyn Trigger], listener: Rc<dyn Fn(usize)>) -> Subscription {
    let subscriptions = sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let listener = Rc::clone(&listener);
            source.observe_trigger(Rc::new(move || listener(index)))
        })
        .collect();
    Subscription::combine(subscriptions)
}
