#![forbid(unsafe_code)]

//! Stream operators.
//!
//! Every operator is a *lift*: a function from the downstream subscriber to a
//! new upstream subscriber. Subscribing to a lifted stream builds a fresh
//! upstream subscriber per downstream subscriber, so operator state (a scan
//! accumulator, a debounce timer, a take counter) is never shared between
//! subscribers.
//!
//! The upstream subscriber inherits the downstream subscriber's [`Role`]. A
//! binding attached through any chain of operators therefore still runs
//! first and may still write its target mid-dispatch.
//!
//! # Invariants
//!
//! 1. Disposing the downstream subscriber disposes the upstream subscription.
//! 2. An upstream terminal message is forwarded downstream exactly once.
//! 3. Derived property streams never deliver two equal values in a row.
//!
//! [`Role`]: super::observer::Role

mod basic;
mod debounce;
mod property;
mod switch;

use std::marker::PhantomData;
use std::rc::Rc;

use pulse_core::Subscription;

use super::event::{EventPublisher, EventStream};
use super::observer::{EventMessage, EventSubscriber, PropertyMessage, PropertySubscriber};
use super::property::{PropertyPublisher, PropertyStream};

// ─── Lifted publishers ───────────────────────────────────────────────────────

struct LiftEventPublisher<U, D, F> {
    upstream: EventStream<U>,
    op: F,
    _marker: PhantomData<fn(D)>,
}

impl<U, D, F> EventPublisher<D> for LiftEventPublisher<U, D, F>
where
    U: Clone + 'static,
    D: 'static,
    F: Fn(EventSubscriber<D>) -> EventSubscriber<U>,
{
    fn subscribe(&self, downstream: EventSubscriber<D>) -> Subscription {
        let upstream = self.upstream.subscribe((self.op)(downstream.clone()));
        let subscription = downstream.subscription();
        subscription.on_dispose(move || upstream.dispose());
        subscription
    }
}

struct LiftPropertyPublisher<U, D, F> {
    upstream: PropertyStream<U>,
    op: F,
    _marker: PhantomData<fn(D)>,
}

impl<U, D, F> PropertyPublisher<D> for LiftPropertyPublisher<U, D, F>
where
    U: Clone + PartialEq + 'static,
    D: Clone + PartialEq + 'static,
    F: Fn(PropertySubscriber<D>) -> PropertySubscriber<U>,
{
    fn subscribe(&self, downstream: PropertySubscriber<D>) -> Subscription {
        let upstream = self.upstream.subscribe((self.op)(downstream.clone()));
        let subscription = downstream.subscription();
        subscription.on_dispose(move || upstream.dispose());
        subscription
    }
}

impl<E: Clone + 'static> EventStream<E> {
    /// Derive a stream by turning each downstream subscriber into a
    /// subscriber of this stream.
    pub fn lift<D, F>(&self, op: F) -> EventStream<D>
    where
        D: Clone + 'static,
        F: Fn(EventSubscriber<D>) -> EventSubscriber<E> + 'static,
    {
        let publisher = LiftEventPublisher {
            upstream: self.clone(),
            op,
            _marker: PhantomData,
        };
        EventStream::from_publisher(self.runtime(), Rc::new(publisher))
    }
}

impl<M: Clone + PartialEq + 'static> PropertyStream<M> {
    /// Derive a property stream by turning each downstream subscriber into a
    /// subscriber of this stream.
    ///
    /// The upstream replay reaches `op`'s subscriber during subscription, so
    /// a derived stream replays as long as `op` forwards values.
    pub fn lift<D, F>(&self, op: F) -> PropertyStream<D>
    where
        D: Clone + PartialEq + 'static,
        F: Fn(PropertySubscriber<D>) -> PropertySubscriber<M> + 'static,
    {
        let publisher = LiftPropertyPublisher {
            upstream: self.clone(),
            op,
            _marker: PhantomData,
        };
        PropertyStream::from_publisher(self.runtime(), Rc::new(publisher))
    }
}

// ─── Subscriber helpers ──────────────────────────────────────────────────────

/// An upstream subscriber that hands events to `on_event` and forwards
/// completion to `downstream`.
pub(crate) fn event_operator<U, D>(
    downstream: EventSubscriber<D>,
    mut on_event: impl FnMut(&EventSubscriber<D>, U) + 'static,
) -> EventSubscriber<U>
where
    U: 'static,
    D: 'static,
{
    EventSubscriber::with_role(downstream.role(), move |message: EventMessage<U>| match message {
        EventMessage::Event(event) => on_event(&downstream, event),
        EventMessage::Completed => downstream.on_completed(),
    })
}

/// An upstream subscriber that hands values to `on_changed` and forwards
/// disposal to `downstream`.
pub(crate) fn property_operator<U, D>(
    downstream: PropertySubscriber<D>,
    mut on_changed: impl FnMut(&PropertySubscriber<D>, U) + 'static,
) -> PropertySubscriber<U>
where
    U: Clone + PartialEq + 'static,
    D: Clone + PartialEq + 'static,
{
    PropertySubscriber::with_role(downstream.role(), move |message: PropertyMessage<U>| match message {
        PropertyMessage::Changed(value) => on_changed(&downstream, value),
        PropertyMessage::Disposed => downstream.on_disposed(),
    })
}
