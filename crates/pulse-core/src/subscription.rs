#![forbid(unsafe_code)]

//! Subscriptions: the single cancellation currency of pulse.
//!
//! A [`Subscription`] is a shared handle to a one-way `active -> disposed`
//! state plus an ordered list of release callbacks. Disposal is idempotent
//! and synchronous; every release callback runs exactly once, each isolated
//! so that a panicking callback cannot starve the ones after it.
//!
//! # Invariants
//!
//! 1. `is_disposed()` never goes from `true` back to `false`.
//! 2. Release callbacks run in registration order, exactly once.
//! 3. A callback registered after disposal runs immediately.
//! 4. Disposing from inside a release callback is a no-op.
//!
//! Unlike an RAII guard, dropping a `Subscription` handle does **not**
//! dispose it; the source keeps delivering until someone calls
//! [`dispose`](Subscription::dispose). Wrap it in a [`SubscriptionGuard`] to
//! tie disposal to a scope.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::callbacks::run_isolated;

/// Something that can be released exactly once.
pub trait Disposable {
    /// Release the resource. Calling this more than once has no further effect.
    fn dispose(&self);

    /// Whether [`dispose`](Disposable::dispose) has been called.
    fn is_disposed(&self) -> bool;
}

struct SubscriptionInner {
    disposed: Cell<bool>,
    on_release: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// Shared handle to a cancellable registration.
///
/// Cloning yields another handle to the **same** subscription.
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<SubscriptionInner>,
}

impl Subscription {
    /// Create an active subscription with no release callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SubscriptionInner {
                disposed: Cell::new(false),
                on_release: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create an active subscription that runs `release` when disposed.
    #[must_use]
    pub fn from_fn(release: impl FnOnce() + 'static) -> Self {
        let subscription = Self::new();
        subscription.on_dispose(release);
        subscription
    }

    /// Create a subscription that is already disposed.
    #[must_use]
    pub fn disposed() -> Self {
        let subscription = Self::new();
        subscription.inner.disposed.set(true);
        subscription
    }

    /// Register a callback to run on disposal.
    ///
    /// If this subscription is already disposed the callback runs now.
    pub fn on_dispose(&self, release: impl FnOnce() + 'static) {
        if self.inner.disposed.get() {
            run_isolated("subscription release", release);
            return;
        }
        self.inner.on_release.borrow_mut().push(Box::new(release));
    }

    /// Dispose this subscription, running every release callback once.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.on_release.borrow_mut());
        for callback in callbacks {
            run_isolated("subscription release", callback);
        }
    }

    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Whether both handles refer to the same subscription.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Dispose this subscription when the returned guard is dropped.
    #[must_use]
    pub fn guard(self) -> SubscriptionGuard {
        SubscriptionGuard {
            subscription: Some(self),
        }
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for Subscription {
    fn dispose(&self) {
        Subscription::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        Subscription::is_disposed(self)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.inner.disposed.get())
            .field("pending_releases", &self.inner.on_release.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SubscriptionGuard
// ---------------------------------------------------------------------------

/// RAII guard that disposes its subscription on drop.
#[must_use = "dropping the guard disposes the subscription"]
pub struct SubscriptionGuard {
    subscription: Option<Subscription>,
}

impl SubscriptionGuard {
    /// Defuse the guard, handing the subscription back without disposing it.
    #[must_use]
    pub fn release(mut self) -> Subscription {
        self.subscription.take().unwrap_or_else(Subscription::disposed)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.dispose();
        }
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("subscription", &self.subscription)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CompositeSubscription
// ---------------------------------------------------------------------------

/// A group of subscriptions disposed together.
///
/// Adding to an already-disposed composite disposes the added subscription
/// immediately.
#[derive(Clone, Debug, Default)]
pub struct CompositeSubscription {
    root: Subscription,
    len: Rc<Cell<usize>>,
}

impl CompositeSubscription {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscription: Subscription) {
        if !self.root.is_disposed() {
            self.len.set(self.len.get() + 1);
        }
        self.root.on_dispose(move || subscription.dispose());
    }

    /// Number of subscriptions added while the composite was active.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.get()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len.get() == 0
    }

    pub fn dispose(&self) {
        self.root.dispose();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.root.is_disposed()
    }

    /// A handle that disposes the whole group.
    #[must_use]
    pub fn subscription(&self) -> Subscription {
        self.root.clone()
    }
}

impl Disposable for CompositeSubscription {
    fn dispose(&self) {
        CompositeSubscription::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        CompositeSubscription::is_disposed(self)
    }
}

// ---------------------------------------------------------------------------
// SerialSubscription
// ---------------------------------------------------------------------------

/// Holds at most one subscription; replacing it disposes the previous one.
#[derive(Clone, Debug, Default)]
pub struct SerialSubscription {
    root: Subscription,
    current: Rc<RefCell<Option<Subscription>>>,
}

impl SerialSubscription {
    #[must_use]
    pub fn new() -> Self {
        let serial = Self::default();
        let current = Rc::clone(&serial.current);
        serial.root.on_dispose(move || {
            let held = current.borrow_mut().take();
            if let Some(held) = held {
                held.dispose();
            }
        });
        serial
    }

    /// Replace the held subscription, disposing the previous one.
    ///
    /// If this serial subscription is disposed, `next` is disposed instead.
    pub fn set(&self, next: Subscription) {
        if self.root.is_disposed() {
            next.dispose();
            return;
        }
        let previous = self.current.borrow_mut().replace(next);
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    /// Dispose the held subscription, if any, keeping this one active.
    pub fn clear(&self) {
        let previous = self.current.borrow_mut().take();
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    #[must_use]
    pub fn has_current(&self) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(|held| !held.is_disposed())
    }

    pub fn dispose(&self) {
        self.root.dispose();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.root.is_disposed()
    }

    #[must_use]
    pub fn subscription(&self) -> Subscription {
        self.root.clone()
    }
}

impl Disposable for SerialSubscription {
    fn dispose(&self) {
        SerialSubscription::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        SerialSubscription::is_disposed(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
