use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_task::ArcWake;

use crate::collections::map::HashMap;
use crate::platform::RuntimeScheduler;

pub type TaskId = u64;

type LocalTask = Pin<Box<dyn Future<Output = ()> + 'static>>;

/// Ids of tasks whose wakers fired. Shared with the wakers, which may be
/// invoked from any thread.
pub(crate) struct ReadyQueue {
    queue: Mutex<VecDeque<TaskId>>,
    scheduler: Arc<dyn RuntimeScheduler>,
}

impl ReadyQueue {
    fn push(&self, id: TaskId) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(id);
        self.scheduler.schedule_tick();
    }

    fn pop(&self) -> Option<TaskId> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn is_empty(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

struct TaskWaker {
    id: TaskId,
    ready: Arc<ReadyQueue>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.ready.push(arc_self.id);
    }
}

/// Single-threaded executor for `'static` local futures.
///
/// A task is taken out of the table while it is polled, so a task may spawn
/// or wake other tasks (or itself) from inside its own poll.
pub(crate) struct Executor {
    tasks: RefCell<HashMap<TaskId, LocalTask>>,
    ready: Arc<ReadyQueue>,
    next_id: Cell<TaskId>,
}

impl Executor {
    pub(crate) fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            tasks: RefCell::new(HashMap::default()),
            ready: Arc::new(ReadyQueue {
                queue: Mutex::new(VecDeque::new()),
                scheduler,
            }),
            next_id: Cell::new(1),
        }
    }

    pub(crate) fn insert(&self, task: LocalTask) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.tasks.borrow_mut().insert(id, task);
        id
    }

    pub(crate) fn schedule(&self, id: TaskId) {
        self.ready.push(id);
    }

    pub(crate) fn pop_ready(&self) -> Option<TaskId> {
        self.ready.pop()
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Polls one task. Returns `false` when the id is unknown, which happens
    /// for stale wake-ups of finished tasks.
    pub(crate) fn poll(&self, id: TaskId) -> bool {
        let Some(mut task) = self.tasks.borrow_mut().remove(&id) else {
            return false;
        };
        let waker = futures_task::waker(Arc::new(TaskWaker {
            id,
            ready: Arc::clone(&self.ready),
        }));
        let mut cx = Context::from_waker(&waker);
        log::trace!("polling task {id}");
        match task.as_mut().poll(&mut cx) {
            Poll::Ready(()) => log::trace!("task {id} completed"),
            Poll::Pending => {
                self.tasks.borrow_mut().insert(id, task);
            }
        }
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.borrow().len()
    }
}
