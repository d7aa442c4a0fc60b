#![forbid(unsafe_code)]

//! Context affinity.
//!
//! Every property and event stream remembers the [`EventLoop`] it was created
//! on and checks it at each public entry point.

use std::fmt;
use std::rc::Rc;

use crate::error::{OrRaise, Result};
use crate::event_loop::EventLoop;

/// The execution context captured when a value was created.
#[derive(Clone)]
pub struct Affinity {
    event_loop: Rc<dyn EventLoop>,
}

impl Affinity {
    #[must_use]
    pub fn new(event_loop: Rc<dyn EventLoop>) -> Self {
        Self { event_loop }
    }

    /// Raise [`ContractViolation::WrongContext`](crate::ContractViolation::WrongContext)
    /// unless called from the owning context.
    #[track_caller]
    pub fn check(&self) {
        self.try_check().or_raise();
    }

    pub fn try_check(&self) -> Result<()> {
        self.event_loop.check_in_event_loop()
    }

    #[must_use]
    pub fn event_loop(&self) -> &Rc<dyn EventLoop> {
        &self.event_loop
    }
}

impl fmt::Debug for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Affinity")
            .field("event_loop", &self.event_loop.name())
            .finish()
    }
}
