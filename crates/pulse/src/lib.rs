#![forbid(unsafe_code)]

//! pulse public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use pulse_core as core;
pub use pulse_runtime as runtime;

pub mod prelude {
    pub use pulse_core::{
        CompositeSubscription, ContractViolation, EventLoop, LabClock, LocalEventLoop,
        SerialSubscription, Subscription,
    };
    pub use pulse_runtime::reactive::{
        BindingObserver, EventMessage, EventStream, EventSubject, Property, PropertyChangeEvent,
        PropertyMessage, PropertyStream, Role, Runtime, RuntimeConfig,
    };
}
