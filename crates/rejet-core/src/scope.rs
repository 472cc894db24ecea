//! Reentrant write batching.
//!
//! A [`Scope`] is entered for every action invocation. Writes made while it
//! is entered are queued by state identity and delivered once, in
//! first-write order, when the outermost frame exits.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::observable::StateId;

type Flush = Box<dyn FnOnce()>;

pub struct Scope {
    depth: Cell<usize>,
    pending: RefCell<IndexMap<StateId, Flush>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            depth: Cell::new(0),
            pending: RefCell::new(IndexMap::new()),
        }
    }

    pub fn enter(self: &Rc<Self>) -> ScopeGuard {
        self.depth.set(self.depth.get() + 1);
        ScopeGuard {
            scope: Rc::clone(self),
        }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Defers `flush` until the outermost frame exits, or runs it right away
    /// when no frame is active. A second write to the same state replaces the
    /// queued flush but keeps its position.
    pub fn enqueue_or_dispatch(&self, id: StateId, flush: Flush) {
        if self.depth.get() == 0 {
            flush();
            return;
        }
        self.pending.borrow_mut().insert(id, flush);
    }

    fn exit(&self) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth > 0 {
            return;
        }
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        if std::thread::panicking() {
            log::warn!("discarding {} pending state writes during unwind", pending.len());
            return;
        }
        if !pending.is_empty() {
            log::trace!("flushing {} batched state writes", pending.len());
        }
        for (_, flush) in pending {
            flush();
        }
    }
}

/// Exits the scope frame when dropped.
#[must_use = "the scope frame exits as soon as the guard is dropped"]
pub struct ScopeGuard {
    scope: Rc<Scope>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.exit();
    }
}
