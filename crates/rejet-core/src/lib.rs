#![doc = r"Reactive state, computed values and a cancellable action scheduler."]

extern crate self as rejet_core;

pub mod action;
pub mod async_computed;
mod collections;
pub mod computed;
pub mod context;
pub mod error;
mod executor;
mod hash;
pub mod keyed_cache;
pub mod loadable;
pub mod mutable_state;
pub mod mutators;
pub mod observable;
pub mod platform;
pub mod publisher;
pub mod runtime;
pub mod scope;
mod timers;
pub mod timing;

pub use action::{Action, ActionBuilder, ActionHandle, ActionPolicy, AsyncAction, RepeatCondition};
pub use async_computed::{AsyncComputed, Evaluation, LoadableView, PendingValue, Selection};
pub use computed::{Computed, Tracker};
pub use context::{ActionContext, Lifecycle, LifecycleEvent, Watch};
pub use error::{ActionError, RuntimeError, SelectorError};
pub use executor::TaskId;
pub use keyed_cache::{ArgKey, KeyedCache};
pub use loadable::{Loadable, LoadableStatus};
pub use mutable_state::{MutableState, State};
pub use mutators::{Advance, CalendarDuration, Merge, OutOfRange};
pub use observable::{subscribe_all, Observable, Readable, StateId, Trigger};
pub use platform::{Clock, DefaultScheduler, ManualClock, RuntimeScheduler};
pub use publisher::{Channel, Listener, Publisher, Subscription};
pub use runtime::{current_runtime_handle, Runtime, RuntimeHandle};
pub use scope::{Scope, ScopeGuard};
pub use timers::TimerId;
pub use timing::{debounce, delay, memoize, once, throttle, Debounced, Delay, Memoized, Once, Throttled};
