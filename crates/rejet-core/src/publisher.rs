//! Named-channel publish/subscribe.
//!
//! Every observable piece of the store (states, computed values, actions and
//! action contexts) notifies through a [`Publisher`]. Channel names are a
//! per-publisher key type, so two publishers can never collide.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::collections::map::HashMap;

pub type Listener<P> = Rc<dyn Fn(&P)>;

type ListenerId = u64;

struct ChannelInner<P> {
    listeners: RefCell<IndexMap<ListenerId, Listener<P>>>,
    next_id: Cell<ListenerId>,
}

/// An ordered set of listeners.
pub struct Channel<P> {
    inner: Rc<ChannelInner<P>>,
}

impl<P> Clone for Channel<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: 'static> Default for Channel<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: 'static> Channel<P> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ChannelInner {
                listeners: RefCell::new(IndexMap::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&P) + 'static) -> Subscription {
        self.subscribe_rc(Rc::new(listener))
    }

    pub fn subscribe_rc(&self, listener: Listener<P>) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.listeners.borrow_mut().insert(id, listener);

        let channel: Weak<ChannelInner<P>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(channel) = channel.upgrade() {
                channel.listeners.borrow_mut().shift_remove(&id);
            }
        })
    }

    /// Invokes every listener registered when the dispatch started.
    ///
    /// Listeners are free to subscribe, unsubscribe or dispatch again while
    /// being called; no borrow is held across the calls. Panics raised by a
    /// listener propagate to the caller.
    pub fn dispatch(&self, payload: &P) {
        let listeners: Vec<Listener<P>> = self.inner.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener(payload);
        }
    }

    pub fn clear(&self) {
        // Take the map out first so dropping listeners cannot observe a
        // borrowed channel.
        let removed = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        drop(removed);
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A mapping from channel name to [`Channel`], with an unnamed default
/// channel. Channels are created on first access and live as long as the
/// publisher.
pub struct Publisher<P, K = ()> {
    channels: RefCell<HashMap<Option<K>, Channel<P>>>,
}

impl<P: 'static, K: Eq + Hash + Clone> Default for Publisher<P, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: 'static, K: Eq + Hash + Clone> Publisher<P, K> {
    pub fn new() -> Self {
        Self {
            channels: RefCell::new(HashMap::default()),
        }
    }

    pub fn channel(&self, name: K) -> Channel<P> {
        self.channel_for(Some(name))
    }

    pub fn default_channel(&self) -> Channel<P> {
        self.channel_for(None)
    }

    fn channel_for(&self, name: Option<K>) -> Channel<P> {
        self.channels
            .borrow_mut()
            .entry(name)
            .or_insert_with(Channel::new)
            .clone()
    }

    pub fn subscribe(&self, listener: impl Fn(&P) + 'static) -> Subscription {
        self.default_channel().subscribe(listener)
    }

    pub fn dispatch(&self, payload: &P) {
        self.default_channel().dispatch(payload);
    }

    /// Removes every listener from every channel. The channels themselves
    /// stay registered and can be subscribed to again.
    pub fn clear(&self) {
        let channels: Vec<Channel<P>> = self.channels.borrow().values().cloned().collect();
        for channel in channels {
            channel.clear();
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.borrow().len()
    }
}

struct SubscriptionInner {
    unsubscribe: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// Handle returned by every `subscribe`. Unsubscribing is idempotent;
/// dropping the handle leaves the listener registered.
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<SubscriptionInner>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            inner: Rc::new(SubscriptionInner {
                unsubscribe: RefCell::new(Some(Box::new(unsubscribe))),
            }),
        }
    }

    /// A subscription that is already inactive.
    pub fn empty() -> Self {
        Self {
            inner: Rc::new(SubscriptionInner {
                unsubscribe: RefCell::new(None),
            }),
        }
    }

    /// Groups several subscriptions behind one handle.
    pub fn combine(subscriptions: Vec<Subscription>) -> Self {
        match subscriptions.len() {
            0 => Self::empty(),
            1 => subscriptions.into_iter().next().unwrap_or_else(Self::empty),
            _ => Self::new(move || {
                for subscription in subscriptions {
                    subscription.unsubscribe();
                }
            }),
        }
    }

    pub fn unsubscribe(&self) {
        let unsubscribe = self.inner.unsubscribe.borrow_mut().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.unsubscribe.borrow().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
