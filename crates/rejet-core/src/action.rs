//! Action scheduler.
//!
//! An action wraps a body and an [`ActionPolicy`]. Each call creates a fresh
//! [`ActionContext`], enters the runtime scope so that writes batch, runs the
//! body and applies the restart/repeat policy until the call settles:
//!
//! * success: emit `Success`, dispatch the value on the action's channel,
//!   emit `Done`; repeat while the repeat condition holds;
//! * failure: emit `Error` then `Done`; restart when `restart_on_failure` is
//!   set, otherwise hand the error to the caller;
//! * cancellation: swallowed, the call reports `Ok(None)`.
//!
//! Every run of the body ends with `Dispose` on the context, which drops the
//! lifecycle listeners that run registered. A synchronous call that repeated
//! reports `Ok(None)`. An asynchronous call that repeated reports its last
//! run's value, and one that restarted after a failure reports `Ok(None)`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{AbortHandle, Abortable, FutureExt, LocalBoxFuture};

use crate::context::ActionContext;
use crate::error::ActionError;
use crate::observable::Observable;
use crate::publisher::{Listener, Publisher, Subscription};
use crate::runtime::{Runtime, RuntimeHandle};

/// Whether a call runs its body again after a successful attempt.
pub enum RepeatCondition<A, T> {
    Never,
    Always,
    Constant(bool),
    While(Rc<dyn Fn(&ActionContext<T>, &A) -> bool>),
}

impl<A, T> RepeatCondition<A, T> {
    pub fn while_(condition: impl Fn(&ActionContext<T>, &A) -> bool + 'static) -> Self {
        RepeatCondition::While(Rc::new(condition))
    }

    fn holds(&self, context: &ActionContext<T>, args: &A) -> bool {
        match self {
            RepeatCondition::Never => false,
            RepeatCondition::Always => true,
            RepeatCondition::Constant(repeat) => *repeat,
            RepeatCondition::While(condition) => condition(context, args),
        }
    }
}

impl<A, T> Clone for RepeatCondition<A, T> {
    fn clone(&self) -> Self {
        match self {
            RepeatCondition::Never => RepeatCondition::Never,
            RepeatCondition::Always => RepeatCondition::Always,
            RepeatCondition::Constant(repeat) => RepeatCondition::Constant(*repeat),
            RepeatCondition::While(condition) => RepeatCondition::While(Rc::clone(condition)),
        }
    }
}

impl<A, T> Default for RepeatCondition<A, T> {
    fn default() -> Self {
        RepeatCondition::Never
    }
}

impl<A, T> fmt::Debug for RepeatCondition<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatCondition::Never => f.write_str("Never"),
            RepeatCondition::Always => f.write_str("Always"),
            RepeatCondition::Constant(repeat) => write!(f, "Constant({repeat})"),
            RepeatCondition::While(_) => f.write_str("While(..)"),
        }
    }
}

pub struct ActionPolicy<A, T> {
    pub restart_on_failure: bool,
    pub repeat: RepeatCondition<A, T>,
}

impl<A, T> Default for ActionPolicy<A, T> {
    fn default() -> Self {
        Self {
            restart_on_failure: false,
            repeat: RepeatCondition::Never,
        }
    }
}

impl<A, T> Clone for ActionPolicy<A, T> {
    fn clone(&self) -> Self {
        Self {
            restart_on_failure: self.restart_on_failure,
            repeat: self.repeat.clone(),
        }
    }
}

impl<A, T> fmt::Debug for ActionPolicy<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionPolicy")
            .field("restart_on_failure", &self.restart_on_failure)
            .field("repeat", &self.repeat)
            .finish()
    }
}

/// What to do after an attempt settled.
enum Next<T> {
    Settle(Result<Option<T>, ActionError>),
    Retry,
    Repeat,
}

struct ActionShared<A, T> {
    runtime: RuntimeHandle,
    policy: ActionPolicy<A, T>,
    publisher: Publisher<T>,
    name: Option<Rc<str>>,
}

impl<A: 'static, T: Clone + 'static> ActionShared<A, T> {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Emits the attempt's lifecycle events.
    fn report(&self, context: &ActionContext<T>, result: &Result<T, ActionError>) {
        match result {
            Ok(value) => {
                context.success(value);
                self.publisher.dispatch(value);
            }
            Err(ActionError::Cancelled) => {}
            Err(error) => context.error(error),
        }
        context.done();
    }

    fn next(&self, context: &ActionContext<T>, args: &A, result: Result<T, ActionError>) -> Next<T> {
        match result {
            Ok(_) if context.is_cancelled() => Next::Settle(Ok(None)),
            Ok(value) => {
                if self.policy.repeat.holds(context, args) {
                    log::debug!("action {} repeating", self.label());
                    Next::Repeat
                } else {
                    Next::Settle(Ok(Some(value)))
                }
            }
            Err(ActionError::Cancelled) => Next::Settle(Ok(None)),
            Err(_) if context.is_cancelled() => Next::Settle(Ok(None)),
            Err(error) if self.policy.restart_on_failure => {
                log::debug!("action {} restarting after failure: {error}", self.label());
                Next::Retry
            }
            Err(error) => Next::Settle(Err(error)),
        }
    }
}

/// Settles a call. `discard` is set when the chain of runs leaves the
/// caller without a value of its own.
fn settle<T>(outcome: Result<Option<T>, ActionError>, discard: bool) -> Result<Option<T>, ActionError> {
    match outcome {
        Ok(Some(_)) if discard => Ok(None),
        outcome => outcome,
    }
}

type SyncBody<A, T> = Rc<dyn Fn(&ActionContext<T>, A) -> Result<T, ActionError>>;

/// An action with a synchronous body.
pub struct Action<A, T> {
    shared: Rc<ActionShared<A, T>>,
    body: SyncBody<A, T>,
}

impl<A, T> Clone for Action<A, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
            body: Rc::clone(&self.body),
        }
    }
}

impl<A: Clone + 'static, T: Clone + 'static> Action<A, T> {
    pub fn new(
        runtime: &Runtime,
        body: impl Fn(&ActionContext<T>, A) -> Result<T, ActionError> + 'static,
    ) -> Self {
        ActionBuilder::new(runtime.handle()).build(body)
    }

    pub fn builder(runtime: &Runtime) -> ActionBuilder<A, T> {
        ActionBuilder::new(runtime.handle())
    }

    /// Runs the body under the action's policy.
    ///
    /// Returns `Ok(Some(value))` for a call that settled with a value,
    /// `Ok(None)` for a cancelled or repeated call, and `Err` for a failure
    /// no restart consumed.
    pub fn call(&self, args: A) -> Result<Option<T>, ActionError> {
        let shared = &self.shared;
        let context = ActionContext::new(shared.runtime.clone());
        let _active = shared.runtime.activate();
        let mut repeated = false;
        let outcome = loop {
            log::debug!("action {} attempt", shared.label());
            let result = {
                let _frame = shared.runtime.enter_scope();
                let result = (self.body)(&context, args.clone());
                shared.report(&context, &result);
                context.end_run();
                result
            };
            match shared.next(&context, &args, result) {
                Next::Settle(outcome) => break settle(outcome, repeated),
                Next::Retry => {}
                Next::Repeat => repeated = true,
            }
        };
        context.dispose();
        outcome
    }

    pub fn policy(&self) -> &ActionPolicy<A, T> {
        &self.shared.policy
    }
}

impl<T: Clone + 'static> Action<T, T> {
    /// An action whose result is its argument: calling it broadcasts the
    /// argument to everything watching the action.
    pub fn passthrough(runtime: &Runtime) -> Self {
        Action::new(runtime, |_, args| Ok(args))
    }
}

impl<A, T: 'static> Observable for Action<A, T> {
    type Event = T;

    fn observe(&self, listener: Listener<T>) -> Subscription {
        self.shared.publisher.default_channel().subscribe_rc(listener)
    }
}

impl<A, T> fmt::Debug for Action<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.shared.name)
            .field("policy", &self.shared.policy)
            .finish()
    }
}

type AsyncBody<A, T> = Rc<dyn Fn(ActionContext<T>, A) -> LocalBoxFuture<'static, Result<T, ActionError>>>;

/// An action with an asynchronous body.
pub struct AsyncAction<A, T> {
    shared: Rc<ActionShared<A, T>>,
    body: AsyncBody<A, T>,
}

impl<A, T> Clone for AsyncAction<A, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
            body: Rc::clone(&self.body),
        }
    }
}

impl<A: Clone + 'static, T: Clone + 'static> AsyncAction<A, T> {
    pub fn new<F>(runtime: &Runtime, body: impl Fn(ActionContext<T>, A) -> F + 'static) -> Self
    where
        F: Future<Output = Result<T, ActionError>> + 'static,
    {
        ActionBuilder::new(runtime.handle()).build_async(body)
    }

    pub fn builder(runtime: &Runtime) -> ActionBuilder<A, T> {
        ActionBuilder::new(runtime.handle())
    }

    /// Starts a call. The body is polled once right away, inside the
    /// caller's scope frame; later polls happen on the runtime, each in a
    /// frame of its own.
    pub fn call(&self, args: A) -> ActionHandle<T> {
        let shared = Rc::clone(&self.shared);
        let body = Rc::clone(&self.body);
        let context = ActionContext::new(shared.runtime.clone());
        let (sender, receiver) = oneshot::channel();

        let driver = {
            let context = context.clone();
            async move {
                let outcome = drive(&shared, &body, &context, args).await;
                let _ = sender.send(outcome);
            }
        };
        let runtime = self.shared.runtime.clone();
        if runtime
            .spawn_eager(Scoped {
                runtime: runtime.clone(),
                inner: driver.boxed_local(),
            })
            .is_none()
        {
            context.dispose();
        }

        ActionHandle { context, receiver }
    }

    pub fn policy(&self) -> &ActionPolicy<A, T> {
        &self.shared.policy
    }
}

async fn drive<A: Clone + 'static, T: Clone + 'static>(
    shared: &ActionShared<A, T>,
    body: &AsyncBody<A, T>,
    context: &ActionContext<T>,
    args: A,
) -> Result<Option<T>, ActionError> {
    let mut restarted = false;
    let outcome = loop {
        log::debug!("action {} attempt", shared.label());
        let (abort, registration) = AbortHandle::new_pair();
        context.arm(abort);
        let attempt = Abortable::new(body(context.clone(), args.clone()), registration).await;
        context.disarm();
        let result = attempt.unwrap_or(Err(ActionError::Cancelled));
        shared.report(context, &result);
        context.end_run();
        match shared.next(context, &args, result) {
            Next::Settle(outcome) => break settle(outcome, restarted),
            Next::Retry => restarted = true,
            Next::Repeat => {}
        }
    };
    context.dispose();
    outcome
}

/// Polls the wrapped task inside a scope frame with its runtime active.
struct Scoped {
    runtime: RuntimeHandle,
    inner: LocalBoxFuture<'static, ()>,
}

impl Future for Scoped {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let _active = self.runtime.activate();
        let _frame = self.runtime.enter_scope();
        self.inner.as_mut().poll(cx)
    }
}

impl<A, T: 'static> Observable for AsyncAction<A, T> {
    type Event = T;

    fn observe(&self, listener: Listener<T>) -> Subscription {
        self.shared.publisher.default_channel().subscribe_rc(listener)
    }
}

impl<A, T> fmt::Debug for AsyncAction<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncAction")
            .field("name", &self.shared.name)
            .field("policy", &self.shared.policy)
            .finish()
    }
}

/// A running asynchronous call. Resolves to the last run's value, or to
/// `Ok(None)` when the call was cancelled or restarted after a failure.
/// Dropping the handle does not cancel the call.
#[must_use = "dropping the handle lets the call run but discards its outcome"]
pub struct ActionHandle<T> {
    context: ActionContext<T>,
    receiver: oneshot::Receiver<Result<Option<T>, ActionError>>,
}

impl<T: Clone + 'static> ActionHandle<T> {
    /// Cancels the call: fires `Cancelling`, drops the in-flight attempt at
    /// its next poll and disposes the context.
    pub fn cancel(&self) {
        self.context.request_cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.context.is_cancelled()
    }

    pub fn context(&self) -> &ActionContext<T> {
        &self.context
    }
}

impl<T> Future for ActionHandle<T> {
    type Output = Result<Option<T>, ActionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.receiver.poll_unpin(cx).map(|outcome| match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                log::warn!("action call dropped before settling");
                Ok(None)
            }
        })
    }
}

impl<T> fmt::Debug for ActionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandle")
            .field("context", &self.context)
            .finish()
    }
}

/// Configures an action's policy before its body is attached.
pub struct ActionBuilder<A, T> {
    runtime: RuntimeHandle,
    policy: ActionPolicy<A, T>,
    name: Option<Rc<str>>,
}

impl<A: Clone + 'static, T: Clone + 'static> ActionBuilder<A, T> {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self {
            runtime,
            policy: ActionPolicy::default(),
            name: None,
        }
    }

    pub fn restart_on_failure(mut self, restart: bool) -> Self {
        self.policy.restart_on_failure = restart;
        self
    }

    pub fn repeat(mut self, repeat: RepeatCondition<A, T>) -> Self {
        self.policy.repeat = repeat;
        self
    }

    pub fn repeat_while(self, condition: impl Fn(&ActionContext<T>, &A) -> bool + 'static) -> Self {
        self.repeat(RepeatCondition::while_(condition))
    }

    pub fn policy(mut self, policy: ActionPolicy<A, T>) -> Self {
        self.policy = policy;
        self
    }

    /// Label used in log lines.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(Rc::from(name));
        self
    }

    fn shared(self) -> Rc<ActionShared<A, T>> {
        Rc::new(ActionShared {
            runtime: self.runtime,
            policy: self.policy,
            publisher: Publisher::new(),
            name: self.name,
        })
    }

    pub fn build(
        self,
        body: impl Fn(&ActionContext<T>, A) -> Result<T, ActionError> + 'static,
    ) -> Action<A, T> {
        Action {
            shared: self.shared(),
            body: Rc::new(body),
        }
    }

    pub fn build_async<F>(self, body: impl Fn(ActionContext<T>, A) -> F + 'static) -> AsyncAction<A, T>
    where
        F: Future<Output = Result<T, ActionError>> + 'static,
    {
        AsyncAction {
            shared: self.shared(),
            body: Rc::new(move |context, args| body(context, args).boxed_local()),
        }
    }
}

impl Runtime {
    pub fn action<A: Clone + 'static, T: Clone + 'static>(
        &self,
        body: impl Fn(&ActionContext<T>, A) -> Result<T, ActionError> + 'static,
    ) -> Action<A, T> {
        Action::new(self, body)
    }

    pub fn async_action<A, T, F>(
        &self,
        body: impl Fn(ActionContext<T>, A) -> F + 'static,
    ) -> AsyncAction<A, T>
    where
        A: Clone + 'static,
        T: Clone + 'static,
        F: Future<Output = Result<T, ActionError>> + 'static,
    {
        AsyncAction::new(self, body)
    }
}

#[cfg(test)]
#[path = "tests/action_tests.rs"]
mod tests;
