#![forbid(unsafe_code)]

//! Observers, the messages they receive, and the subscriber wrappers that
//! enforce delivery rules on their behalf.
//!
//! An observer sees a closed set of messages through a single
//! [`Observer::notify`] call:
//!
//! - properties send [`PropertyMessage::Changed`] then, once,
//!   [`PropertyMessage::Disposed`];
//! - event streams send [`EventMessage::Event`] then, once,
//!   [`EventMessage::Completed`].
//!
//! Any `FnMut(message)` closure is an observer. Wrap one in
//! [`BindingObserver`] to give it the [`Role::Binding`] role, which exempts its
//! property writes from the mutation-during-dispatch gate.
//!
//! The subscriber wrappers ([`PropertySubscriber`], [`EventSubscriber`]) sit
//! between a publisher and an observer. They make the observer inert after the
//! terminal message, isolate its panics, and (for properties) drop consecutive
//! duplicate values.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use pulse_core::Subscription;
use pulse_core::callbacks::run_isolated;

/// How the dispatch engine treats a subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Role {
    #[default]
    Plain,
    /// Propagates values into a property; delivered first and allowed to
    /// write mid-dispatch.
    Binding,
}

impl Role {
    #[inline]
    #[must_use]
    pub fn is_binding(self) -> bool {
        matches!(self, Self::Binding)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyMessage<M> {
    Changed(M),
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventMessage<E> {
    Event(E),
    Completed,
}

/// Receives messages of type `N`.
pub trait Observer<N> {
    fn notify(&mut self, message: N);

    fn role(&self) -> Role {
        Role::Plain
    }
}

impl<N, F: FnMut(N)> Observer<N> for F {
    fn notify(&mut self, message: N) {
        self(message);
    }
}

/// An observer with the [`Role::Binding`] role.
pub struct BindingObserver<F>(pub F);

impl<N, F: FnMut(N)> Observer<N> for BindingObserver<F> {
    fn notify(&mut self, message: N) {
        (self.0)(message);
    }

    fn role(&self) -> Role {
        Role::Binding
    }
}

/// An observer with an explicit role.
pub(crate) struct RoleObserver<F> {
    role: Role,
    f: F,
}

impl<N, F: FnMut(N)> Observer<N> for RoleObserver<F> {
    fn notify(&mut self, message: N) {
        (self.f)(message);
    }

    fn role(&self) -> Role {
        self.role
    }
}

pub(crate) fn with_role<N, F: FnMut(N)>(role: Role, f: F) -> RoleObserver<F> {
    RoleObserver { role, f }
}

/// An observer plus the messages that reached it while it was busy.
struct Mailbox<N> {
    observer: RefCell<Box<dyn Observer<N>>>,
    backlog: RefCell<VecDeque<N>>,
}

impl<N> Mailbox<N> {
    fn new(observer: Box<dyn Observer<N>>) -> Self {
        Self {
            observer: RefCell::new(observer),
            backlog: RefCell::new(VecDeque::new()),
        }
    }

    /// Deliver `message`, or queue it behind the delivery in progress.
    fn post(&self, message: N) {
        let Ok(mut observer) = self.observer.try_borrow_mut() else {
            self.backlog.borrow_mut().push_back(message);
            return;
        };
        run_isolated("observer", || observer.notify(message));
        loop {
            let next = self.backlog.borrow_mut().pop_front();
            let Some(message) = next else {
                break;
            };
            run_isolated("observer", || observer.notify(message));
        }
    }
}

// ─── Property subscriber ─────────────────────────────────────────────────────

struct PropertySubscriberInner<M> {
    mailbox: Mailbox<PropertyMessage<M>>,
    role: Role,
    last: RefCell<Option<M>>,
    terminated: Cell<bool>,
    subscription: Subscription,
}

/// Delivers property messages to one observer.
///
/// # Invariants
///
/// 1. Two consecutive `Changed` messages never carry equal values.
/// 2. `Disposed` is delivered at most once and nothing follows it.
/// 3. Disposing the subscriber stops delivery.
pub struct PropertySubscriber<M> {
    inner: Rc<PropertySubscriberInner<M>>,
}

impl<M> Clone for PropertySubscriber<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M: Clone + PartialEq + 'static> PropertySubscriber<M> {
    /// Wrap `observer`, taking its role.
    pub fn new(observer: impl Observer<PropertyMessage<M>> + 'static) -> Self {
        let role = observer.role();
        Self {
            inner: Rc::new(PropertySubscriberInner {
                mailbox: Mailbox::new(Box::new(observer)),
                role,
                last: RefCell::new(None),
                terminated: Cell::new(false),
                subscription: Subscription::new(),
            }),
        }
    }

    /// Wrap `f`, overriding its role.
    pub fn with_role(role: Role, f: impl FnMut(PropertyMessage<M>) + 'static) -> Self {
        Self::new(with_role(role, f))
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn on_changed(&self, value: M) {
        if self.is_disposed() {
            return;
        }
        {
            let mut last = self.inner.last.borrow_mut();
            if last.as_ref() == Some(&value) {
                return;
            }
            *last = Some(value.clone());
        }
        self.inner.mailbox.post(PropertyMessage::Changed(value));
    }

    pub fn on_disposed(&self) {
        if self.is_disposed() || self.inner.terminated.replace(true) {
            return;
        }
        self.inner.mailbox.post(PropertyMessage::Disposed);
        self.inner.subscription.dispose();
    }

    /// The subscription that cancels this subscriber.
    #[must_use]
    pub fn subscription(&self) -> Subscription {
        self.inner.subscription.clone()
    }

    pub fn dispose(&self) {
        self.inner.subscription.dispose();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.terminated.get() || self.inner.subscription.is_disposed()
    }
}

impl<M> fmt::Debug for PropertySubscriber<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySubscriber")
            .field("role", &self.inner.role)
            .field("terminated", &self.inner.terminated.get())
            .field("subscription", &self.inner.subscription)
            .finish()
    }
}

// ─── Event subscriber ────────────────────────────────────────────────────────

struct EventSubscriberInner<E> {
    mailbox: Mailbox<EventMessage<E>>,
    role: Role,
    terminated: Cell<bool>,
    subscription: Subscription,
}

/// Delivers events to one observer until completion or disposal.
pub struct EventSubscriber<E> {
    inner: Rc<EventSubscriberInner<E>>,
}

impl<E> Clone for EventSubscriber<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: 'static> EventSubscriber<E> {
    pub fn new(observer: impl Observer<EventMessage<E>> + 'static) -> Self {
        let role = observer.role();
        Self {
            inner: Rc::new(EventSubscriberInner {
                mailbox: Mailbox::new(Box::new(observer)),
                role,
                terminated: Cell::new(false),
                subscription: Subscription::new(),
            }),
        }
    }

    pub fn with_role(role: Role, f: impl FnMut(EventMessage<E>) + 'static) -> Self {
        Self::new(with_role(role, f))
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn on_event(&self, event: E) {
        if self.is_disposed() {
            return;
        }
        self.inner.mailbox.post(EventMessage::Event(event));
    }

    pub fn on_completed(&self) {
        if self.is_disposed() || self.inner.terminated.replace(true) {
            return;
        }
        self.inner.mailbox.post(EventMessage::Completed);
        self.inner.subscription.dispose();
    }

    #[must_use]
    pub fn subscription(&self) -> Subscription {
        self.inner.subscription.clone()
    }

    pub fn dispose(&self) {
        self.inner.subscription.dispose();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.terminated.get() || self.inner.subscription.is_disposed()
    }
}

impl<E> fmt::Debug for EventSubscriber<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscriber")
            .field("role", &self.inner.role)
            .field("terminated", &self.inner.terminated.get())
            .field("subscription", &self.inner.subscription)
            .finish()
    }
}
