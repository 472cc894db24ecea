use std::fmt;
use std::rc::Rc;

/// Outcome of an action attempt or of a wrapped operation inside one.
#[derive(Clone, Debug)]
pub enum ActionError {
    /// The action was cancelled. Swallowed by the scheduler; only code inside
    /// a body ever sees it.
    Cancelled,
    Failed(Rc<anyhow::Error>),
}

impl ActionError {
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        ActionError::Failed(Rc::new(error.into()))
    }

    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        ActionError::Failed(Rc::new(anyhow::Error::msg(message)))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActionError::Cancelled)
    }

    pub fn as_failure(&self) -> Option<&anyhow::Error> {
        match self {
            ActionError::Cancelled => None,
            ActionError::Failed(error) => Some(error),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::Cancelled => write!(f, "action cancelled"),
            ActionError::Failed(error) => write!(f, "action failed: {error}"),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<anyhow::Error> for ActionError {
    fn from(error: anyhow::Error) -> Self {
        ActionError::Failed(Rc::new(error))
    }
}

/// Failure of an asynchronous selector. Stored in the entry's loadable and
/// never forwarded to dependents.
#[derive(Clone, Debug)]
pub struct SelectorError(Rc<anyhow::Error>);

impl SelectorError {
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        SelectorError(Rc::new(error.into()))
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "selector failed: {}", self.0)
    }
}

impl std::error::Error for SelectorError {}

impl From<anyhow::Error> for SelectorError {
    fn from(error: anyhow::Error) -> Self {
        SelectorError(Rc::new(error))
    }
}

/// Errors reported by runtime drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime was dropped before the awaited work finished.
    Dropped,
    /// Nothing is left that could ever wake the awaited future.
    Stalled,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Dropped => write!(f, "runtime dropped"),
            RuntimeError::Stalled => write!(f, "runtime stalled with no pending timers or tasks"),
        }
    }
}

impl std::error::Error for RuntimeError {}
