#![forbid(unsafe_code)]

//! Glitch-free reactive values.
//!
//! This module provides the two reactive primitives and the dispatch engine
//! underneath them:
//!
//! - [`Property`]: a cell that always holds a value. Observers receive the
//!   current value on subscription and every distinct change after that.
//! - [`EventStream`] / [`EventSubject`]: discrete events with no stored
//!   value, terminated by a single completion.
//! - [`Runtime`]: the factory both are created through. It carries the
//!   [`EventLoop`](pulse_core::EventLoop) the values are bound to and the
//!   [`DispatchCoordinator`] shared by every value it created.
//!
//! # Architecture
//!
//! Each property and subject owns a [`Dispatcher`]. A dispatcher delivers one
//! value at a time to a snapshot of its subscriber slots with its dispatching
//! flag raised, and registers itself with the runtime's coordinator so any
//! code can ask whether a dispatch is in flight.
//!
//! Everything is `Rc`-based and single-threaded. Every entry point checks
//! that it runs on the runtime's event loop.
//!
//! # Invariants
//!
//! 1. A property never delivers two equal values in a row to an observer.
//! 2. Bindings of a property run before its plain observers.
//! 3. A property may be written while nothing is dispatching, or from a
//!    binding. Writing it from a plain observer mid-dispatch is a
//!    [`ContractViolation`](pulse_core::ContractViolation).
//! 4. While an event is being delivered, property deliveries are queued and
//!    run in order once every observer of that event has returned.
//! 5. Disposal is terminal and idempotent; observers receive exactly one
//!    terminal message.

mod binding;
pub mod change;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod event;
pub mod observer;
mod operators;
pub mod property;
pub mod runtime;

pub use change::PropertyChangeEvent;
pub use config::RuntimeConfig;
pub use coordinator::{
    AppliedSnapshot, DispatchCoordinator, DispatchSnapshot, DispatchState, Flavor,
    PausedDispatchers,
};
pub use dispatcher::{Delivery, Dispatcher};
pub use event::{EventPublisher, EventStream, EventSubject};
pub use observer::{
    BindingObserver, EventMessage, EventSubscriber, Observer, PropertyMessage, PropertySubscriber,
    Role,
};
pub use property::{
    Property, PropertyPublisher, PropertySource, PropertyStream, ValueSource, WeakProperty,
};
pub use runtime::Runtime;
