//! Testing utilities and harness for rejet

pub mod testing;

// Re-export testing utilities
pub use testing::*;

pub mod prelude {
    pub use crate::testing::*;
    pub use rejet_core::{ActionContext, ActionError, Observable, Readable};
}
