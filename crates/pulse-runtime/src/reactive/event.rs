#![forbid(unsafe_code)]

//! Event streams: stateless sequences of discrete events.
//!
//! An [`EventStream`] is a publisher plus the runtime it belongs to. It holds
//! no value and replays nothing; a subscriber sees the events published after
//! it attached, then at most one completion.
//!
//! [`EventSubject`] is the stream you publish into by hand. Publishing
//! pauses every property dispatcher of the runtime until all of the event's
//! observers have run, so property changes caused by handling one event are
//! observed only after every sibling handler saw the event.
//!
//! # Failure Modes
//!
//! - **Publish after dispose**: [`EventSubject::publish`] raises
//!   [`ContractViolation::DispatchAfterDispose`](pulse_core::ContractViolation).
//! - **Producer disposes its own subscription**: the subscriber completes.

use std::fmt;
use std::rc::Rc;

use pulse_core::error::OrRaise;
use pulse_core::{Result, Subscription};

use super::coordinator::Flavor;
use super::dispatcher::{Delivery, Dispatcher};
use super::observer::{EventMessage, EventSubscriber, Observer};
use super::runtime::Runtime;

// ─── Publishers ──────────────────────────────────────────────────────────────

/// Something event subscribers can attach to.
pub trait EventPublisher<E> {
    /// Attach `subscriber` and return its subscription.
    fn subscribe(&self, subscriber: EventSubscriber<E>) -> Subscription;
}

/// A publisher driven by a producer closure, run once per subscriber.
pub(crate) struct FnPublisher<F> {
    producer: F,
}

impl<F> FnPublisher<F> {
    pub(crate) fn new(producer: F) -> Self {
        Self { producer }
    }
}

impl<E, F> EventPublisher<E> for FnPublisher<F>
where
    E: 'static,
    F: Fn(EventSubscriber<E>) -> Subscription,
{
    fn subscribe(&self, subscriber: EventSubscriber<E>) -> Subscription {
        let subscription = subscriber.subscription();
        let teardown = (self.producer)(subscriber.clone());
        let producer_side = teardown.clone();
        subscription.on_dispose(move || producer_side.dispose());
        teardown.on_dispose(move || subscriber.on_completed());
        subscription
    }
}

// ─── Event stream ────────────────────────────────────────────────────────────

/// A stream of events.
///
/// Cloning yields another handle to the **same** stream.
pub struct EventStream<E> {
    publisher: Rc<dyn EventPublisher<E>>,
    runtime: Runtime,
}

impl<E> Clone for EventStream<E> {
    fn clone(&self) -> Self {
        Self {
            publisher: Rc::clone(&self.publisher),
            runtime: self.runtime.clone(),
        }
    }
}

impl<E: Clone + 'static> EventStream<E> {
    pub fn from_publisher(runtime: &Runtime, publisher: Rc<dyn EventPublisher<E>>) -> Self {
        Self {
            publisher,
            runtime: runtime.clone(),
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    #[track_caller]
    pub fn observe(&self, observer: impl Observer<EventMessage<E>> + 'static) -> Subscription {
        self.subscribe(EventSubscriber::new(observer))
    }

    /// Attach an already-built subscriber.
    #[track_caller]
    pub fn subscribe(&self, subscriber: EventSubscriber<E>) -> Subscription {
        self.runtime.affinity().check();
        self.publisher.subscribe(subscriber)
    }

    #[track_caller]
    pub fn on_event(&self, mut f: impl FnMut(E) + 'static) -> Subscription {
        self.observe(move |message: EventMessage<E>| {
            if let EventMessage::Event(event) = message {
                f(event);
            }
        })
    }

    #[track_caller]
    pub fn on_completed(&self, mut f: impl FnMut() + 'static) -> Subscription {
        self.observe(move |message: EventMessage<E>| {
            if matches!(message, EventMessage::Completed) {
                f();
            }
        })
    }
}

impl<E> fmt::Debug for EventStream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

// ─── Subject ─────────────────────────────────────────────────────────────────

struct SubjectInner<E> {
    dispatcher: Dispatcher<E>,
    runtime: Runtime,
}

impl<E: Clone + 'static> EventPublisher<E> for SubjectInner<E> {
    fn subscribe(&self, subscriber: EventSubscriber<E>) -> Subscription {
        let sink = subscriber.clone();
        let slot = self
            .dispatcher
            .subscribe(subscriber.role(), move |delivery| match delivery {
                Delivery::Next(event) => sink.on_event(event),
                Delivery::Terminal => sink.on_completed(),
            });
        let subscription = subscriber.subscription();
        subscription.on_dispose(move || slot.dispose());
        subscription
    }
}

/// An event stream published into directly.
///
/// Cloning yields another handle to the **same** subject.
pub struct EventSubject<E> {
    inner: Rc<SubjectInner<E>>,
}

impl<E> Clone for EventSubject<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Clone + 'static> EventSubject<E> {
    pub(crate) fn new(runtime: &Runtime) -> Self {
        Self {
            inner: Rc::new(SubjectInner {
                dispatcher: runtime.dispatcher(Flavor::Event),
                runtime: runtime.clone(),
            }),
        }
    }

    /// Deliver `event` to every current observer.
    #[track_caller]
    pub fn publish(&self, event: E) {
        self.try_publish(event).or_raise();
    }

    pub fn try_publish(&self, event: E) -> Result<()> {
        self.inner.runtime.affinity().try_check()?;
        self.inner.dispatcher.try_dispatch(event)
    }

    /// Complete every observer. Terminal and idempotent.
    #[track_caller]
    pub fn dispose(&self) {
        self.inner.runtime.affinity().check();
        self.inner.dispatcher.dispose();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.dispatcher.is_disposed()
    }

    #[must_use]
    pub fn has_observers(&self) -> bool {
        self.inner.dispatcher.has_subscribers()
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    #[must_use]
    pub fn stream(&self) -> EventStream<E> {
        EventStream::from_publisher(
            &self.inner.runtime,
            Rc::clone(&self.inner) as Rc<dyn EventPublisher<E>>,
        )
    }

    #[track_caller]
    pub fn observe(&self, observer: impl Observer<EventMessage<E>> + 'static) -> Subscription {
        self.stream().observe(observer)
    }

    #[track_caller]
    pub fn on_event(&self, f: impl FnMut(E) + 'static) -> Subscription {
        self.stream().on_event(f)
    }
}

impl<E> fmt::Debug for EventSubject<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubject")
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{ContractViolation, LocalEventLoop};
    use std::cell::RefCell;

    fn runtime() -> Runtime {
        Runtime::new(Rc::new(LocalEventLoop::new("test")))
    }

    fn recorder<E: 'static>() -> (
        Rc<RefCell<Vec<EventMessage<E>>>>,
        impl FnMut(EventMessage<E>) + 'static,
    ) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        (log, move |message| sink.borrow_mut().push(message))
    }

    #[test]
    fn no_replay_for_late_subscribers() {
        let runtime = runtime();
        let subject = runtime.subject();
        subject.publish("tacos");
        let (log, sink) = recorder();
        let _sub = subject.observe(sink);
        subject.publish("burritos");
        assert_eq!(*log.borrow(), vec![EventMessage::Event("burritos")]);
    }

    #[test]
    fn dispose_completes_observers_once() {
        let runtime = runtime();
        let subject = runtime.subject::<u8>();
        let (log, sink) = recorder();
        let sub = subject.observe(sink);
        subject.dispose();
        subject.dispose();
        assert_eq!(*log.borrow(), vec![EventMessage::Completed]);
        assert!(sub.is_disposed());
        assert!(!subject.has_observers());
    }

    #[test]
    fn subscribe_after_dispose_completes_immediately() {
        let runtime = runtime();
        let subject = runtime.subject::<u8>();
        subject.dispose();
        let (log, sink) = recorder();
        let sub = subject.observe(sink);
        assert_eq!(*log.borrow(), vec![EventMessage::Completed]);
        assert!(sub.is_disposed());
    }

    #[test]
    fn publish_after_dispose_is_rejected() {
        let runtime = runtime();
        let subject = runtime.subject::<u8>();
        let id = subject.inner.dispatcher.id();
        subject.dispose();
        assert_eq!(
            subject.try_publish(1),
            Err(ContractViolation::DispatchAfterDispose { dispatcher: id })
        );
    }

    #[test]
    fn unsubscribed_observer_stops_receiving() {
        let runtime = runtime();
        let subject = runtime.subject();
        let (log, sink) = recorder();
        let sub = subject.observe(sink);
        subject.publish(1);
        sub.dispose();
        subject.publish(2);
        assert_eq!(*log.borrow(), vec![EventMessage::Event(1)]);
        assert!(!subject.has_observers());
    }

    #[test]
    fn property_writes_wait_for_sibling_handlers() {
        let runtime = runtime();
        let subject = runtime.subject::<i32>();
        let count = runtime.property(0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&order);
        let _observer = count.on_changed(move |value| log.borrow_mut().push(format!("count:{value}")));
        let _binding = count.bind_events(&subject.stream());
        let log = Rc::clone(&order);
        let _sibling = subject.on_event(move |event| log.borrow_mut().push(format!("event:{event}")));

        subject.publish(3);
        assert_eq!(*order.borrow(), vec!["count:0", "event:3", "count:3"]);
    }

    #[test]
    fn handler_receives_events_it_publishes() {
        let runtime = runtime();
        let subject = runtime.subject::<i32>();
        let (a_log, b_log) = (Rc::new(RefCell::new(Vec::new())), Rc::new(RefCell::new(Vec::new())));

        let (sink, publisher) = (Rc::clone(&a_log), subject.clone());
        let _a = subject.on_event(move |event| {
            sink.borrow_mut().push(event);
            if event == 1 {
                publisher.publish(2);
            }
        });
        let sink = Rc::clone(&b_log);
        let _b = subject.on_event(move |event| sink.borrow_mut().push(event));

        subject.publish(1);
        assert_eq!(*a_log.borrow(), vec![1, 2]);
        assert_eq!(*b_log.borrow(), vec![2, 1]);
    }
}
