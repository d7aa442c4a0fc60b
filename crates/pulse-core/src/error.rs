#![forbid(unsafe_code)]

//! Programming-contract violations.
//!
//! Every error in pulse is a bug in the calling code: touching a value from the
//! wrong context, mutating a property from a plain observer mid-dispatch,
//! dispatching after disposal, and so on. The panicking entry points raise
//! these through [`ContractViolation::raise`]; the `try_*` entry points hand
//! them back as a [`Result`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContractViolation>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("called outside of event loop `{event_loop}` that owns this value")]
    WrongContext { event_loop: String },

    #[error("dispatcher {dispatcher} has been disposed; cannot dispatch")]
    DispatchAfterDispose { dispatcher: u64 },

    #[error(
        "a property cannot be set from an observer callback while a dispatch is in progress; \
         use bind to connect a stream to the property"
    )]
    MutationDuringDispatch,

    #[error("take must be given a positive count")]
    ZeroTake,

    #[error("a property change event needs distinct old and new values")]
    UnchangedValue,

    #[error("at least one stream is required to merge")]
    EmptyMerge,

    #[error("a property cannot be synchronized with itself")]
    SelfSynchronize,
}

impl ContractViolation {
    /// Panic with this violation, reporting the caller's location.
    #[track_caller]
    pub fn raise(self) -> ! {
        tracing::debug!(violation = %self, "contract violation");
        panic!("{self}")
    }
}

/// Unwraps a contract check, raising the violation at the caller's location.
pub trait OrRaise<T> {
    fn or_raise(self) -> T;
}

impl<T> OrRaise<T> for Result<T> {
    #[track_caller]
    fn or_raise(self) -> T {
        match self {
            Ok(value) => value,
            Err(violation) => violation.raise(),
        }
    }
}
