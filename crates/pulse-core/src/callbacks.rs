#![forbid(unsafe_code)]

//! Isolated execution of user callbacks.
//!
//! A panicking observer must not prevent delivery to its siblings, and must
//! not leave dispatcher flags behind. [`run_isolated`] catches the unwind,
//! logs it at `WARN` under the `pulse::callback` target, and reports whether
//! the callback completed.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Run `f`, swallowing any panic it raises.
///
/// Returns `true` if `f` returned normally.
pub fn run_isolated(what: &'static str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::warn!(
                target: "pulse::callback",
                callback = what,
                panic = %panic_message(payload.as_ref()),
                "isolated callback panicked"
            );
            false
        }
    }
}

/// Best-effort extraction of a panic payload's message.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
