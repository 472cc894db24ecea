use super::*;
use crate::platform::ManualClock;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

fn advance(runtime: &Runtime, clock: &Arc<ManualClock>, millis: u64) {
    runtime.run_until_stalled();
    for _ in 0..millis {
        clock.advance(1);
        runtime.run_until_stalled();
    }
}

fn capture<T: 'static>(runtime: &Runtime, handle: ActionHandle<T>) -> Rc<RefCell<Option<Result<Option<T>, ActionError>>>> {
    let slot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    runtime.handle().spawn(async move {
        *sink.borrow_mut() = Some(handle.await);
    });
    slot
}

#[test]
fn writes_in_a_body_reach_subscribers_once_after_it_returns() {
    let (runtime, _) = Runtime::manual();
    let state = runtime.state(0);
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        let _ = state.subscribe(move |value: &i32| seen.borrow_mut().push(*value));
    }
    let inner = {
        let state = state.clone();
        runtime.action(move |ctx: &ActionContext<()>, by: i32| {
            ctx.update(&state, |value| value + by)?;
            Ok(())
        })
    };
    let outer = {
        let (state, inner, seen) = (state.clone(), inner.clone(), Rc::clone(&seen));
        runtime.action(move |ctx: &ActionContext<()>, ()| {
            ctx.set(&state, 10)?;
            inner.call(1)?;
            ctx.call(|| inner.call(2))??;
            assert!(seen.borrow().is_empty());
            Ok(())
        })
    };

    outer.call(()).expect("no failure");

    assert_eq!(*seen.borrow(), vec![13]);
}

#[test]
fn sync_success_emits_lifecycle_and_action_channel() {
    let (runtime, _) = Runtime::manual();
    let log = Rc::new(RefCell::new(Vec::new()));
    let action = {
        let log = Rc::clone(&log);
        runtime.action(move |ctx: &ActionContext<u32>, value: u32| {
            let tag = Rc::clone(&log);
            let _ = ctx.on_success(move |v| tag.borrow_mut().push(format!("success {v}")));
            let tag = Rc::clone(&log);
            let _ = ctx.on_done(move || tag.borrow_mut().push("done".into()));
            let tag = Rc::clone(&log);
            let _ = ctx.on_dispose(move || tag.borrow_mut().push("dispose".into()));
            Ok(value + 1)
        })
    };
    {
        let log = Rc::clone(&log);
        let _ = action.subscribe(move |v: &u32| log.borrow_mut().push(format!("dispatch {v}")));
    }

    assert_eq!(action.call(1).expect("ok"), Some(2));
    assert_eq!(
        *log.borrow(),
        vec!["success 2", "dispatch 2", "done", "dispose"]
    );
}

#[test]
fn sync_failure_is_returned_without_restart() {
    let (runtime, _) = Runtime::manual();
    let errors = Rc::new(Cell::new(0));
    let action = {
        let errors = Rc::clone(&errors);
        runtime.action(move |ctx: &ActionContext<()>, ()| {
            let errors = Rc::clone(&errors);
            let _ = ctx.on_error(move |_| errors.set(errors.get() + 1));
            Err(ActionError::msg("broken"))
        })
    };
    let dispatched = Rc::new(Cell::new(false));
    {
        let dispatched = Rc::clone(&dispatched);
        let _ = action.subscribe(move |_| dispatched.set(true));
    }

    let error = action.call(()).expect_err("failure surfaces");
    assert_eq!(error.to_string(), "action failed: broken");
    assert_eq!(errors.get(), 1);
    assert!(!dispatched.get());
}

#[test]
fn sync_runs_share_a_context_but_not_its_listeners() {
    let (runtime, _) = Runtime::manual();
    let attempts = Rc::new(Cell::new(0));
    let disposals = Rc::new(Cell::new(0));
    let successes = Rc::new(RefCell::new(Vec::new()));
    let action = {
        let (attempts, disposals, successes) =
            (Rc::clone(&attempts), Rc::clone(&disposals), Rc::clone(&successes));
        Action::builder(&runtime)
            .restart_on_failure(true)
            .repeat_while(|_, limit: &u32| *limit > 0)
            .name("counter")
            .build(move |ctx: &ActionContext<u32>, limit: u32| {
                attempts.set(attempts.get() + 1);
                let run = attempts.get();
                let disposals = Rc::clone(&disposals);
                let _ = ctx.on_dispose(move || disposals.set(disposals.get() + 1));
                let successes = Rc::clone(&successes);
                let _ = ctx.on_success(move |_| successes.borrow_mut().push(run));
                assert!(!ctx.is_disposed());
                match run {
                    2 => Err(ActionError::msg("flaky")),
                    4 => ctx.cancel(),
                    _ => Ok(limit),
                }
            })
    };

    assert_eq!(action.call(3).expect("cancelled calls settle"), None);
    assert_eq!(attempts.get(), 4);
    assert_eq!(disposals.get(), 4);
    assert_eq!(*successes.borrow(), vec![1, 3]);
}

#[test]
fn repeated_runs_fire_only_their_own_success_listeners() {
    let (runtime, _) = Runtime::manual();
    let runs = Rc::new(Cell::new(0));
    let fired = Rc::new(RefCell::new(Vec::new()));
    let action = {
        let (runs, fired) = (Rc::clone(&runs), Rc::clone(&fired));
        let check = Rc::clone(&runs);
        Action::builder(&runtime)
            .repeat_while(move |_, _: &()| check.get() < 3)
            .build(move |ctx: &ActionContext<u32>, ()| {
                runs.set(runs.get() + 1);
                let run = runs.get();
                let fired = Rc::clone(&fired);
                let _ = ctx.on_success(move |_| fired.borrow_mut().push(run));
                Ok(run)
            })
    };

    action.call(()).expect("ok");

    assert_eq!(*fired.borrow(), vec![1, 2, 3]);
}

#[test]
fn repeated_calls_report_no_value() {
    let (runtime, _) = Runtime::manual();
    let runs = Rc::new(Cell::new(0));
    let action = {
        let runs = Rc::clone(&runs);
        let check = Rc::clone(&runs);
        Action::builder(&runtime)
            .repeat_while(move |_, _: &()| check.get() < 3)
            .build(move |_: &ActionContext<u8>, ()| {
                runs.set(runs.get() + 1);
                Ok(7)
            })
    };

    assert_eq!(action.call(()).expect("ok"), None);
    assert_eq!(runs.get(), 3);
}

#[test]
fn passthrough_broadcasts_its_argument() {
    let (runtime, _) = Runtime::manual();
    let click = Action::passthrough(&runtime);
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        let _ = click.subscribe(move |label: &&str| seen.borrow_mut().push(*label));
    }

    assert_eq!(click.call("left").expect("ok"), Some("left"));
    click.call("right").expect("ok");

    assert_eq!(*seen.borrow(), vec!["left", "right"]);
}

#[test]
fn async_body_runs_eagerly_until_its_first_suspension() {
    let (runtime, clock) = Runtime::manual();
    let state = runtime.state("idle");
    let action = {
        let state = state.clone();
        runtime.async_action(move |ctx: ActionContext<&'static str>, ()| {
            let state = state.clone();
            async move {
                ctx.set(&state, "started")?;
                ctx.delay(10).await?;
                ctx.set(&state, "finished")?;
                Ok("result")
            }
        })
    };

    let handle = action.call(());
    assert_eq!(state.get(), "started");
    let outcome = capture(&runtime, handle);

    advance(&runtime, &clock, 10);

    assert_eq!(state.get(), "finished");
    assert!(matches!(outcome.borrow().as_ref(), Some(Ok(Some("result")))));
}

#[test]
fn cancelling_an_async_call_drops_its_pending_work() {
    let (runtime, clock) = Runtime::manual();
    let effects = Rc::new(Cell::new(0));
    let action = {
        let effects = Rc::clone(&effects);
        runtime.async_action(move |ctx: ActionContext<()>, ()| {
            let effects = Rc::clone(&effects);
            async move {
                ctx.delay(10).await?;
                effects.set(effects.get() + 1);
                Ok(())
            }
        })
    };

    let handle = action.call(());
    let cancelling = Rc::new(Cell::new(false));
    {
        let cancelling = Rc::clone(&cancelling);
        let _ = handle.context().on_cancelling(move || cancelling.set(true));
    }
    advance(&runtime, &clock, 5);
    handle.cancel();
    assert!(handle.is_cancelled());
    assert!(cancelling.get());
    let outcome = capture(&runtime, handle);
    advance(&runtime, &clock, 10);

    assert_eq!(effects.get(), 0);
    assert!(matches!(outcome.borrow().as_ref(), Some(Ok(None))));
    assert_eq!(runtime.pending_timers(), 0);

    let again = capture(&runtime, action.call(()));
    advance(&runtime, &clock, 10);
    assert_eq!(effects.get(), 1);
    assert!(matches!(again.borrow().as_ref(), Some(Ok(Some(())))));
}

#[test]
fn async_failures_resolve_to_errors_without_restart() {
    let (runtime, _) = Runtime::manual();
    let action = runtime.async_action(|_: ActionContext<()>, ()| async {
        Err(ActionError::msg("unreachable host"))
    });

    let outcome = capture(&runtime, action.call(()));
    runtime.run_until_stalled();

    assert!(matches!(
        outcome.borrow().as_ref(),
        Some(Err(ActionError::Failed(_)))
    ));
}

#[test]
fn async_results_are_dispatched_on_the_action_channel() {
    let (runtime, clock) = Runtime::manual();
    let action = runtime.async_action(|ctx: ActionContext<u64>, millis: u64| async move {
        ctx.delay(millis).await?;
        Ok(millis * 2)
    });
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        let _ = action.subscribe(move |value: &u64| seen.borrow_mut().push(*value));
    }

    let _first = action.call(3);
    let _second = action.call(1);
    advance(&runtime, &clock, 3);

    assert_eq!(*seen.borrow(), vec![2, 6]);
}

#[test]
fn async_repeats_resolve_to_the_last_run() {
    let (runtime, clock) = Runtime::manual();
    let runs = Rc::new(Cell::new(0u32));
    let fired = Rc::new(RefCell::new(Vec::new()));
    let action = {
        let (runs, fired) = (Rc::clone(&runs), Rc::clone(&fired));
        let check = Rc::clone(&runs);
        AsyncAction::builder(&runtime)
            .repeat_while(move |_, _: &()| check.get() < 3)
            .build_async(move |ctx: ActionContext<u32>, ()| {
                let (runs, fired) = (Rc::clone(&runs), Rc::clone(&fired));
                async move {
                    ctx.delay(2).await?;
                    runs.set(runs.get() + 1);
                    let run = runs.get();
                    let _ = ctx.on_success(move |_| fired.borrow_mut().push(run));
                    Ok(run)
                }
            })
    };

    let outcome = capture(&runtime, action.call(()));
    advance(&runtime, &clock, 10);

    assert!(matches!(outcome.borrow().as_ref(), Some(Ok(Some(3)))));
    assert_eq!(*fired.borrow(), vec![1, 2, 3]);
}

#[test]
fn async_restarts_resolve_without_a_value() {
    let (runtime, clock) = Runtime::manual();
    let runs = Rc::new(Cell::new(0u32));
    let action = {
        let runs = Rc::clone(&runs);
        AsyncAction::builder(&runtime)
            .restart_on_failure(true)
            .build_async(move |ctx: ActionContext<u32>, ()| {
                let runs = Rc::clone(&runs);
                async move {
                    ctx.delay(1).await?;
                    runs.set(runs.get() + 1);
                    if runs.get() == 1 {
                        return Err(ActionError::msg("first run fails"));
                    }
                    Ok(runs.get())
                }
            })
    };

    let outcome = capture(&runtime, action.call(()));
    advance(&runtime, &clock, 5);

    assert_eq!(runs.get(), 2);
    assert!(matches!(outcome.borrow().as_ref(), Some(Ok(None))));
}
