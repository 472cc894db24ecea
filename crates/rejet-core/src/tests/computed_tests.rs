use super::*;
use crate::mutable_state::MutableState;

fn counted<T: 'static>(
    calls: &Rc<Cell<usize>>,
    f: impl Fn(&Tracker<'_>) -> T + 'static,
) -> impl Fn(&Tracker<'_>) -> T + 'static {
    let calls = Rc::clone(calls);
    move |tracker| {
        calls.set(calls.get() + 1);
        f(tracker)
    }
}

#[test]
fn reads_are_memoized_until_a_dependency_changes() {
    let (runtime, _) = Runtime::manual();
    let base = runtime.state(2);
    let calls = Rc::new(Cell::new(0));
    let doubled = {
        let base = base.clone();
        runtime.computed(counted(&calls, move |tracker| tracker.get(&base) * 2))
    };

    assert_eq!(doubled.value(), 4);
    assert_eq!(doubled.value(), 4);
    assert_eq!(calls.get(), 1);

    base.set(5);
    assert_eq!(calls.get(), 1, "recomputation is lazy");
    assert_eq!(doubled.value(), 10);
    assert_eq!(calls.get(), 2);
}

#[test]
fn dependency_changes_notify_with_unit_payload() {
    let (runtime, _) = Runtime::manual();
    let base = runtime.state(1);
    let doubled = {
        let base = base.clone();
        runtime.computed(move |tracker| tracker.get(&base) * 2)
    };
    let hits = Rc::new(Cell::new(0));
    {
        let hits = Rc::clone(&hits);
        let _ = doubled.subscribe(move |_: &()| hits.set(hits.get() + 1));
    }

    doubled.value();
    base.set(2);
    base.set(3);
    base.set(3);

    assert_eq!(hits.get(), 2);
    assert_eq!(doubled.value(), 6);
}

#[test]
fn any_change_invalidates_every_argument_tuple() {
    let (runtime, _) = Runtime::manual();
    let factor = runtime.state(10);
    let calls = Rc::new(Cell::new(0));
    let scaled = {
        let factor = factor.clone();
        let calls = Rc::clone(&calls);
        runtime.computed_with_args(move |tracker, value: &i32| {
            calls.set(calls.get() + 1);
            tracker.get(&factor) * value
        })
    };

    assert_eq!(scaled.get(&1), 10);
    assert_eq!(scaled.get(&2), 20);
    assert_eq!(scaled.get(&1), 10);
    assert_eq!(calls.get(), 2);

    let epoch = scaled.epoch();
    factor.set(3);
    assert_eq!(scaled.epoch(), epoch + 1);
    assert_eq!(scaled.get(&2), 6);
    assert_eq!(scaled.get(&1), 3);
    assert_eq!(calls.get(), 4);
}

#[test]
fn dependencies_no_longer_read_are_dropped() {
    let (runtime, _) = Runtime::manual();
    let use_left = runtime.state(true);
    let left = runtime.state("left");
    let right = runtime.state("right");
    let picked = {
        let (use_left, left, right) = (use_left.clone(), left.clone(), right.clone());
        runtime.computed(move |tracker| {
            if tracker.get(&use_left) {
                tracker.get(&left)
            } else {
                tracker.get(&right)
            }
        })
    };

    assert_eq!(picked.value(), "left");
    assert_eq!(picked.dependency_count(), 2);

    use_left.set(false);
    assert_eq!(picked.value(), "right");
    assert_eq!(picked.dependency_count(), 2);
    assert_eq!(left.subscriber_count(), 0);

    let hits = Rc::new(Cell::new(0));
    {
        let hits = Rc::clone(&hits);
        let _ = picked.subscribe(move |_| hits.set(hits.get() + 1));
    }
    left.set("ignored");
    assert_eq!(hits.get(), 0);
    right.set("changed");
    assert_eq!(hits.get(), 1);
}

#[test]
fn unread_dependencies_keep_notifying_between_reads() {
    let (runtime, _) = Runtime::manual();
    let base = runtime.state(0);
    let mirror = {
        let base = base.clone();
        runtime.computed(move |tracker| tracker.get(&base))
    };
    let hits = Rc::new(Cell::new(0));
    {
        let hits = Rc::clone(&hits);
        let _ = mirror.subscribe(move |_| hits.set(hits.get() + 1));
    }

    mirror.value();
    for next in 1..=3 {
        base.set(next);
    }

    assert_eq!(hits.get(), 3);
    assert_eq!(mirror.value(), 3);
}

#[test]
fn computed_values_can_depend_on_each_other() {
    let (runtime, _) = Runtime::manual();
    let items: MutableState<Vec<u32>> = runtime.state(vec![1, 2, 3]);
    let total = {
        let items = items.clone();
        runtime.computed(move |tracker| tracker.get(&items).iter().sum::<u32>())
    };
    let label = {
        let total = total.clone();
        runtime.computed(move |tracker| format!("total={}", tracker.get(&total)))
    };

    assert_eq!(label.value(), "total=6");
    items.update(|items| items.iter().map(|item| item * 10).collect());
    assert_eq!(label.value(), "total=60");
    assert_eq!(label.loadable().value().map(String::as_str), Some("total=60"));
}

#[test]
fn batched_writes_invalidate_once() {
    let (runtime, _) = Runtime::manual();
    let a = runtime.state(1);
    let b = runtime.state(1);
    let sum = {
        let (a, b) = (a.clone(), b.clone());
        runtime.computed(move |tracker| tracker.get(&a) + tracker.get(&b))
    };
    sum.value();
    let epoch = sum.epoch();

    runtime.batch(|| {
        a.set(2);
        a.set(3);
    });

    assert_eq!(sum.epoch(), epoch + 1);
    assert_eq!(sum.value(), 4);
}
