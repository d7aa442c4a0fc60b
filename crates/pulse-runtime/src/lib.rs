#![forbid(unsafe_code)]

//! Runtime: properties, event streams, operators, and the glitch-free
//! dispatch engine behind them.

pub mod reactive;

pub use reactive::{
    EventMessage, EventStream, EventSubject, Property, PropertyChangeEvent, PropertyMessage,
    PropertyStream, Runtime, RuntimeConfig,
};
