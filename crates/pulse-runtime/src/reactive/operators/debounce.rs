#![forbid(unsafe_code)]

//! Quiet-period filtering.
//!
//! The emission is scheduled on the runtime's event loop through
//! [`Runtime::schedule_deferred`](crate::reactive::Runtime::schedule_deferred),
//! so it runs in the dispatch context of the event that armed it. A debounced
//! stream feeding a binding can therefore still write its target.

use std::cell::RefCell;
use std::rc::Rc;

use pulse_core::SerialSubscription;
use web_time::Duration;

use crate::reactive::event::EventStream;
use crate::reactive::observer::{EventMessage, EventSubscriber};

impl<E: Clone + 'static> EventStream<E> {
    /// Emit an event only once `quiet` has passed without another one.
    ///
    /// Each event replaces the pending one and restarts the timer.
    /// Completion emits the pending event, if any, then completes.
    /// Disposing the subscriber cancels the timer.
    pub fn debounce(&self, quiet: Duration) -> EventStream<E> {
        let runtime = self.runtime().clone();
        self.lift(move |downstream: EventSubscriber<E>| {
            let timer = SerialSubscription::new();
            let pending: Rc<RefCell<Option<E>>> = Rc::new(RefCell::new(None));
            downstream.subscription().on_dispose({
                let timer = timer.clone();
                move || timer.dispose()
            });

            let runtime = runtime.clone();
            EventSubscriber::with_role(downstream.role(), move |message: EventMessage<E>| match message {
                EventMessage::Event(event) => {
                    *pending.borrow_mut() = Some(event);
                    let (pending, downstream) = (Rc::clone(&pending), downstream.clone());
                    timer.set(runtime.schedule_deferred(quiet, move || {
                        let event = pending.borrow_mut().take();
                        if let Some(event) = event {
                            downstream.on_event(event);
                        }
                    }));
                }
                EventMessage::Completed => {
                    timer.clear();
                    let event = pending.borrow_mut().take();
                    if let Some(event) = event {
                        downstream.on_event(event);
                    }
                    downstream.on_completed();
                }
            })
        })
    }
}
