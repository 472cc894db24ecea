use crate::error::SelectorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadableStatus {
    Loading,
    HasValue,
    HasError,
}

/// Settlement state of a computed entry.
#[derive(Clone, Debug)]
pub enum Loadable<T> {
    Loading,
    HasValue(T),
    HasError(SelectorError),
}

impl<T> Loadable<T> {
    pub fn status(&self) -> LoadableStatus {
        match self {
            Loadable::Loading => LoadableStatus::Loading,
            Loadable::HasValue(_) => LoadableStatus::HasValue,
            Loadable::HasError(_) => LoadableStatus::HasError,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Loadable::Loading)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Loadable::HasValue(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SelectorError> {
        match self {
            Loadable::HasError(error) => Some(error),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loadable<U> {
        match self {
            Loadable::Loading => Loadable::Loading,
            Loadable::HasValue(value) => Loadable::HasValue(f(value)),
            Loadable::HasError(error) => Loadable::HasError(error),
        }
    }
}

impl<T> From<Result<T, SelectorError>> for Loadable<T> {
    fn from(result: Result<T, SelectorError>) -> Self {
        match result {
            Ok(value) => Loadable::HasValue(value),
            Err(error) => Loadable::HasError(error),
        }
    }
}
