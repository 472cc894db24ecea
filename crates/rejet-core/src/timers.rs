use std::collections::BTreeMap;

use crate::collections::map::HashMap;

pub type TimerId = u64;

type TimerCallback = Box<dyn FnOnce() + 'static>;

/// Timers ordered by deadline, then by registration order.
pub(crate) struct TimerQueue {
    entries: BTreeMap<(u64, TimerId), TimerCallback>,
    deadlines: HashMap<TimerId, u64>,
    next_id: TimerId,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            deadlines: HashMap::default(),
            next_id: 1,
        }
    }

    pub(crate) fn insert(&mut self, deadline: u64, callback: TimerCallback) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert((deadline, id), callback);
        self.deadlines.insert(id, deadline);
        id
    }

    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.entries.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns the earliest timer whose deadline has passed.
    pub(crate) fn pop_due(&mut self, now: u64) -> Option<TimerCallback> {
        let key = *self.entries.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.deadlines.remove(&key.1);
        self.entries.remove(&key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn due_timers_pop_in_deadline_then_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = TimerQueue::new();
        for (deadline, tag) in [(20, "late"), (10, "first"), (10, "second")] {
            let log = Rc::clone(&log);
            queue.insert(deadline, Box::new(move || log.borrow_mut().push(tag)));
        }

        assert_eq!(queue.next_deadline(), Some(10));
        while let Some(callback) = queue.pop_due(15) {
            callback();
        }

        assert_eq!(*log.borrow(), vec!["first", "second"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_deadline(), Some(20));
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut queue = TimerQueue::new();
        let id = queue.insert(5, Box::new(|| panic!("cancelled timer fired")));

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(queue.pop_due(100).is_none());
        assert_eq!(queue.next_deadline(), None);
    }
}
