use super::*;
use std::cell::Cell;

fn counting_subscriber<S: Observable>(state: &S) -> Rc<Cell<usize>> {
    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    let _ = state.subscribe(move |_| counter.set(counter.get() + 1));
    hits
}

#[test]
fn setting_an_equal_value_notifies_nobody() {
    let (runtime, _) = Runtime::manual();
    let state = runtime.state(5);
    let hits = counting_subscriber(&state);

    state.set(5);

    assert_eq!(hits.get(), 0);
    assert_eq!(state.get(), 5);
}

#[test]
fn writes_outside_a_batch_notify_immediately_with_the_new_value() {
    let (runtime, _) = Runtime::manual();
    let state = runtime.state(String::from("a"));
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        let _ = state.subscribe(move |value: &String| seen.borrow_mut().push(value.clone()));
    }

    state.set("b".into());
    state.update(|value| format!("{value}c"));

    assert_eq!(*seen.borrow(), vec!["b", "bc"]);
}

#[test]
fn batched_writes_deliver_one_notification_with_the_final_value() {
    let (runtime, _) = Runtime::manual();
    let state = runtime.state(0);
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        let _ = state.subscribe(move |value: &i32| seen.borrow_mut().push(*value));
    }

    runtime.batch(|| {
        state.set(1);
        state.set(2);
        runtime.batch(|| state.set(3));
        assert!(seen.borrow().is_empty());
    });

    assert_eq!(*seen.borrow(), vec![3]);
}

#[test]
fn read_only_views_share_the_cell() {
    let (runtime, _) = Runtime::manual();
    let state = runtime.state(vec![1, 2]);
    let view = state.as_state();
    let hits = counting_subscriber(&view);

    state.update(|items| {
        let mut items = items.clone();
        items.push(3);
        items
    });

    assert_eq!(view.get(), vec![1, 2, 3]);
    assert_eq!(view.with(|items| items.len()), 3);
    assert_eq!(view.id(), state.id());
    assert_eq!(hits.get(), 1);
}

#[test]
fn unsubscribed_listeners_stop_receiving() {
    let (runtime, _) = Runtime::manual();
    let state = runtime.state(0u8);
    let hits = Rc::new(Cell::new(0));
    let subscription = {
        let hits = Rc::clone(&hits);
        state.subscribe(move |_| hits.set(hits.get() + 1))
    };

    state.set(1);
    subscription.unsubscribe();
    state.set(2);

    assert_eq!(hits.get(), 1);
    assert_eq!(state.subscriber_count(), 0);
}
