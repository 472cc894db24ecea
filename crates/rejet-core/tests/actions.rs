use std::cell::Cell;
use std::rc::Rc;

use rejet_core::{
    Action, ActionBuilder, ActionContext, ActionError, AsyncAction, Lifecycle, MutableState,
    Readable,
};
use rejet_testing::{init_logging, TestRuntime};

#[test]
fn epic_sees_one_event_per_click() {
    init_logging();
    let test = TestRuntime::new();
    let runtime = test.runtime();
    let click: Action<u32, u32> = Action::passthrough(runtime);
    let clicks = runtime.state(0u32);
    let last = runtime.state(0u32);

    let epic = {
        let (click, clicks, last) = (click.clone(), clicks.clone(), last.clone());
        runtime.async_action(move |ctx: ActionContext<()>, ()| {
            let (click, clicks, last) = (click.clone(), clicks.clone(), last.clone());
            async move {
                while !ctx.is_cancelled() {
                    let button = ctx.watch(&click).await?;
                    ctx.add(&clicks, 1u32)?;
                    ctx.set(&last, button)?;
                }
                Ok(())
            }
        })
    };
    let running = epic.call(());

    for button in [1, 2, 3] {
        click.call(button).expect("passthrough never fails");
        test.run_until_stalled();
    }
    assert_eq!(clicks.get(), 3);
    assert_eq!(last.get(), 3);

    running.cancel();
    let outcome = test.block_on(running);
    click.call(4).expect("passthrough never fails");
    test.run_until_stalled();

    assert!(matches!(outcome, Some(Ok(None))));
    assert_eq!(clicks.get(), 3);
}

#[test]
fn cancelled_call_skips_its_delayed_effect_and_the_next_call_runs() {
    let test = TestRuntime::new();
    let runtime = test.runtime();
    let saved = runtime.state(Vec::<&'static str>::new());
    let save = {
        let saved = saved.clone();
        runtime.async_action(move |ctx: ActionContext<()>, draft: &'static str| {
            let saved = saved.clone();
            async move {
                ctx.delay(50).await?;
                ctx.update(&saved, |drafts| {
                    let mut drafts = drafts.clone();
                    drafts.push(draft);
                    drafts
                })
            }
        })
    };

    let first = save.call("first");
    test.advance(20);
    first.cancel();
    test.advance(100);
    assert!(saved.get().is_empty());

    let second = test.spawn(save.call("second"));
    test.advance(50);

    assert_eq!(saved.get(), vec!["second"]);
    assert!(matches!(*second.borrow(), Some(Ok(Some(())))));
}

fn ticking_counter(
    test: &TestRuntime,
    counter: &MutableState<i32>,
    builder: impl FnOnce(ActionBuilder<(), ()>) -> ActionBuilder<(), ()>,
    single_step: bool,
) -> AsyncAction<(), ()> {
    let counter = counter.clone();
    builder(AsyncAction::builder(test.runtime())).build_async(move |ctx: ActionContext<()>, ()| {
        let counter = counter.clone();
        async move {
            loop {
                ctx.delay(5).await?;
                ctx.add(&counter, 1i32)?;
                match ctx.get(&counter) {
                    5 => return Err(ActionError::msg("five is unlucky")),
                    7 => return Ok(()),
                    _ if single_step => return Ok(()),
                    _ => {}
                }
            }
        }
    })
}

#[test]
fn restart_on_failure_resumes_until_the_body_returns() {
    let test = TestRuntime::new();
    let counter = test.runtime().state(0i32);
    let action = ticking_counter(&test, &counter, |builder| builder.restart_on_failure(true), false);

    let errors = Rc::new(Cell::new(0));
    let handle = action.call(());
    {
        let errors = Rc::clone(&errors);
        let _ = handle.context().on_error(move |_| errors.set(errors.get() + 1));
    }
    let outcome = test.spawn(handle);
    test.advance(100);

    assert_eq!(counter.get(), 7);
    assert_eq!(errors.get(), 1);
    assert!(matches!(*outcome.borrow(), Some(Ok(None))), "a restarted call reports no value");
    assert_eq!(test.now(), 100);
}

#[test]
fn repeat_while_keeps_calling_until_the_condition_fails() {
    let test = TestRuntime::new();
    let counter = test.runtime().state(0i32);
    let condition = counter.clone();
    let action = ticking_counter(
        &test,
        &counter,
        move |builder| {
            builder
                .restart_on_failure(true)
                .repeat_while(move |ctx, _| ctx.get(&condition) < 7)
        },
        true,
    );

    let outcome = test.spawn(action.call(()));
    test.advance(100);

    assert_eq!(counter.get(), 7);
    assert!(matches!(*outcome.borrow(), Some(Ok(None))), "the chain restarted once, at five");
}

#[test]
fn failures_without_restart_reach_the_caller() {
    let test = TestRuntime::new();
    let counter = test.runtime().state(0i32);
    let action = ticking_counter(&test, &counter, |builder| builder.name("no-restart"), false);

    let outcome = test.block_on(action.call(()));

    assert_eq!(counter.get(), 5);
    match outcome {
        Some(Err(error)) => assert!(error.to_string().contains("five is unlucky")),
        other => panic!("expected a failure, got {other:?}"),
    }
}

#[test]
fn cancel_from_inside_a_body_settles_quietly() {
    let test = TestRuntime::new();
    let runtime = test.runtime();
    let query = runtime.state(String::new());
    let searches = Rc::new(Cell::new(0));
    let search = {
        let (query, searches) = (query.clone(), Rc::clone(&searches));
        runtime.action(move |ctx: &ActionContext<usize>, ()| {
            if ctx.get(&query).is_empty() {
                return ctx.cancel();
            }
            searches.set(searches.get() + 1);
            Ok(Readable::get(&query).len())
        })
    };
    let dispatched = Rc::new(Cell::new(0));
    {
        let dispatched = Rc::clone(&dispatched);
        let _ = rejet_core::Observable::subscribe(&search, move |_: &usize| {
            dispatched.set(dispatched.get() + 1)
        });
    }

    assert_eq!(search.call(()).expect("cancellation is not a failure"), None);
    query.set("rust".into());
    assert_eq!(search.call(()).expect("no failure"), Some(4));

    assert_eq!(searches.get(), 1);
    assert_eq!(dispatched.get(), 1);
}

#[test]
fn lifecycle_channels_follow_the_call() {
    let test = TestRuntime::new();
    let action = AsyncAction::new(test.runtime(), |ctx: ActionContext<u8>, fail: bool| async move {
        ctx.delay(1).await?;
        if fail {
            Err(ActionError::msg("requested failure"))
        } else {
            Ok(1)
        }
    });

    for (fail, expected) in [
        (false, vec![Lifecycle::Success, Lifecycle::Done, Lifecycle::Dispose]),
        (true, vec![Lifecycle::Error, Lifecycle::Done, Lifecycle::Dispose]),
    ] {
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let handle = action.call(fail);
        let ctx = handle.context().clone();
        let record = |name: Lifecycle| {
            let seen = Rc::clone(&seen);
            move || seen.borrow_mut().push(name)
        };
        let _ = ctx.on_success({
            let record = record(Lifecycle::Success);
            move |_| record()
        });
        let _ = ctx.on_error({
            let record = record(Lifecycle::Error);
            move |_| record()
        });
        let _ = ctx.on_done(record(Lifecycle::Done));
        let _ = ctx.on_dispose(record(Lifecycle::Dispose));

        let _ = test.block_on(handle);

        assert_eq!(*seen.borrow(), expected);
        assert!(ctx.is_disposed());
    }
}
