#![forbid(unsafe_code)]

//! Core: subscriptions, callback isolation, context affinity, and the event
//! loop contract that the reactive runtime schedules through.

pub mod affinity;
pub mod callbacks;
pub mod error;
pub mod event_loop;
#[cfg(feature = "tracing-json")]
pub mod logging;
pub mod subscription;

pub use affinity::Affinity;
pub use error::{ContractViolation, Result};
pub use event_loop::{EventLoop, LabClock, LocalEventLoop, TimeSource};
pub use subscription::{
    CompositeSubscription, Disposable, SerialSubscription, Subscription, SubscriptionGuard,
};
