#![forbid(unsafe_code)]

//! Properties: reactive cells that always hold a value.
//!
//! # Invariants
//!
//! 1. `get()` always returns a value; there is no unset state.
//! 2. Consecutive values delivered to any observer are never equal.
//! 3. A new observer receives the current value synchronously while
//!    subscribing, followed by the disposed notification if the property is
//!    already disposed.
//! 4. `set` from inside one of the property's own deliveries is silently
//!    ignored.
//! 5. `set` while any dispatch of the same runtime is in flight is a contract
//!    violation, unless it comes from a binding.
//!
//! # Failure Modes
//!
//! - **Write from a plain observer mid-dispatch**: `set` raises
//!   [`ContractViolation::MutationDuringDispatch`]; `try_set` returns it. Use
//!   [`Property::bind`] to propagate values between properties instead.
//! - **Write after dispose**: ignored; the value is frozen.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use pulse_core::error::OrRaise;
use pulse_core::{CompositeSubscription, ContractViolation, Result, Subscription};

use super::coordinator::Flavor;
use super::dispatcher::{Delivery, Dispatcher};
use super::event::EventStream;
use super::observer::{Observer, PropertyMessage, PropertySubscriber};
use super::runtime::Runtime;

// ─── Sources ─────────────────────────────────────────────────────────────────

/// Where a property's value is stored.
pub trait PropertySource<M> {
    fn get(&self) -> M;
    fn set(&self, value: M);
}

/// The default in-memory source.
#[derive(Debug, Default)]
pub struct ValueSource<M> {
    value: RefCell<M>,
}

impl<M> ValueSource<M> {
    pub fn new(initial: M) -> Self {
        Self {
            value: RefCell::new(initial),
        }
    }
}

impl<M: Clone> PropertySource<M> for ValueSource<M> {
    fn get(&self) -> M {
        self.value.borrow().clone()
    }

    fn set(&self, value: M) {
        *self.value.borrow_mut() = value;
    }
}

// ─── Publishers ──────────────────────────────────────────────────────────────

/// Something property subscribers can attach to.
pub trait PropertyPublisher<M> {
    /// Attach `subscriber`, replaying the current value to it. Returns the
    /// subscriber's subscription.
    fn subscribe(&self, subscriber: PropertySubscriber<M>) -> Subscription;
}

// ─── Property ────────────────────────────────────────────────────────────────

pub(crate) struct PropertyInner<M> {
    source: Box<dyn PropertySource<M>>,
    dispatcher: Dispatcher<M>,
    initial: M,
    runtime: Runtime,
}

impl<M: Clone + PartialEq + 'static> PropertyPublisher<M> for PropertyInner<M> {
    fn subscribe(&self, subscriber: PropertySubscriber<M>) -> Subscription {
        let sink = subscriber.clone();
        let slot = self.dispatcher.subscribe_with_replay(
            subscriber.role(),
            move |delivery| match delivery {
                Delivery::Next(value) => sink.on_changed(value),
                Delivery::Terminal => sink.on_disposed(),
            },
            Some(self.source.get()),
        );
        let subscription = subscriber.subscription();
        subscription.on_dispose(move || slot.dispose());
        subscription
    }
}

/// A reactive cell.
///
/// Cloning yields another handle to the **same** property.
pub struct Property<M> {
    inner: Rc<PropertyInner<M>>,
}

impl<M> Clone for Property<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M: Clone + PartialEq + 'static> Property<M> {
    pub(crate) fn from_source(runtime: &Runtime, source: Box<dyn PropertySource<M>>) -> Self {
        let initial = source.get();
        Self {
            inner: Rc::new(PropertyInner {
                source,
                dispatcher: runtime.dispatcher(Flavor::Property),
                initial,
                runtime: runtime.clone(),
            }),
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// The current value.
    #[track_caller]
    #[must_use]
    pub fn get(&self) -> M {
        self.try_get().or_raise()
    }

    pub fn try_get(&self) -> Result<M> {
        self.inner.runtime.affinity().try_check()?;
        Ok(self.inner.source.get())
    }

    /// The value captured at construction.
    #[must_use]
    pub fn initial_value(&self) -> &M {
        &self.inner.initial
    }

    /// Change the value and notify observers.
    ///
    /// A no-op when the value is unchanged, the property is disposed, or the
    /// call comes from inside this property's own delivery.
    #[track_caller]
    pub fn set(&self, value: M) {
        self.try_set(value).or_raise();
    }

    pub fn try_set(&self, value: M) -> Result<()> {
        let inner = &self.inner;
        inner.runtime.affinity().try_check()?;
        if inner.dispatcher.is_dispatching() || inner.dispatcher.is_disposed() {
            return Ok(());
        }
        if inner.source.get() == value {
            return Ok(());
        }
        inner.runtime.coordinator().check_can_dispatch()?;
        inner.source.set(value.clone());
        inner.dispatcher.try_dispatch(value)
    }

    /// Set the value back to [`initial_value`](Self::initial_value).
    #[track_caller]
    pub fn reset(&self) {
        self.set(self.inner.initial.clone());
    }

    /// The stream of this property's values.
    #[must_use]
    pub fn stream(&self) -> PropertyStream<M> {
        PropertyStream::from_publisher(
            &self.inner.runtime,
            Rc::clone(&self.inner) as Rc<dyn PropertyPublisher<M>>,
        )
    }

    #[track_caller]
    pub fn observe(&self, observer: impl Observer<PropertyMessage<M>> + 'static) -> Subscription {
        self.stream().observe(observer)
    }

    #[track_caller]
    pub fn on_changed(&self, f: impl FnMut(M) + 'static) -> Subscription {
        self.stream().on_changed(f)
    }

    #[track_caller]
    pub fn on_disposed(&self, f: impl FnMut() + 'static) -> Subscription {
        self.stream().on_disposed(f)
    }

    // ── Bindings ─────────────────────────────────────────────────────

    /// Mirror `stream` into this property.
    ///
    /// The binding ends when the returned subscription is disposed, when
    /// this property is disposed, or when `stream` is disposed.
    #[track_caller]
    pub fn bind(&self, stream: &PropertyStream<M>) -> Subscription {
        self.inner.runtime.affinity().check();
        let subscription = stream.observe(super::binding::property_binding(self));
        self.attach(subscription.clone());
        subscription
    }

    /// Set this property to every event of `stream`.
    #[track_caller]
    pub fn bind_events(&self, stream: &EventStream<M>) -> Subscription {
        self.inner.runtime.affinity().check();
        let subscription = stream.observe(super::binding::event_binding(self));
        self.attach(subscription.clone());
        subscription
    }

    /// Bind both ways; both properties take `other`'s value.
    ///
    /// Disposing either property, or the returned subscription, removes
    /// both bindings.
    #[track_caller]
    pub fn synchronize(&self, other: &Property<M>) -> Subscription {
        self.try_synchronize(other).or_raise()
    }

    pub fn try_synchronize(&self, other: &Property<M>) -> Result<Subscription> {
        self.inner.runtime.affinity().try_check()?;
        if self.ptr_eq(other) {
            return Err(ContractViolation::SelfSynchronize);
        }
        let forward = self.bind(&other.stream());
        let backward = other.bind(&self.stream());
        let pair = CompositeSubscription::new();
        pair.add(forward);
        pair.add(backward);
        self.attach(pair.subscription());
        other.attach(pair.subscription());
        Ok(pair.subscription())
    }

    /// Dispose `subscription` when this property is disposed.
    pub fn attach(&self, subscription: Subscription) {
        self.inner.dispatcher.on_disposed(subscription);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Terminal and idempotent: observers receive `Disposed` and are released.
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
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakProperty<M> {
        WeakProperty {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for Property<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("value", &self.inner.source.get())
            .field("initial", &self.inner.initial)
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

/// A non-owning handle to a [`Property`].
pub struct WeakProperty<M> {
    inner: Weak<PropertyInner<M>>,
}

impl<M> Clone for WeakProperty<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<M> WeakProperty<M> {
    #[must_use]
    pub fn upgrade(&self) -> Option<Property<M>> {
        self.inner.upgrade().map(|inner| Property { inner })
    }
}

// ─── Property stream ─────────────────────────────────────────────────────────

/// A read-only view of a property or of a value derived from one.
///
/// Every subscriber receives the current value on subscription.
pub struct PropertyStream<M> {
    publisher: Rc<dyn PropertyPublisher<M>>,
    runtime: Runtime,
}

impl<M> Clone for PropertyStream<M> {
    fn clone(&self) -> Self {
        Self {
            publisher: Rc::clone(&self.publisher),
            runtime: self.runtime.clone(),
        }
    }
}

impl<M: Clone + PartialEq + 'static> PropertyStream<M> {
    pub fn from_publisher(runtime: &Runtime, publisher: Rc<dyn PropertyPublisher<M>>) -> Self {
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
    pub fn observe(&self, observer: impl Observer<PropertyMessage<M>> + 'static) -> Subscription {
        self.runtime.affinity().check();
        self.publisher.subscribe(PropertySubscriber::new(observer))
    }

    /// Attach an already-built subscriber.
    #[track_caller]
    pub fn subscribe(&self, subscriber: PropertySubscriber<M>) -> Subscription {
        self.runtime.affinity().check();
        self.publisher.subscribe(subscriber)
    }

    #[track_caller]
    pub fn on_changed(&self, mut f: impl FnMut(M) + 'static) -> Subscription {
        self.observe(move |message: PropertyMessage<M>| {
            if let PropertyMessage::Changed(value) = message {
                f(value);
            }
        })
    }

    #[track_caller]
    pub fn on_disposed(&self, mut f: impl FnMut() + 'static) -> Subscription {
        self.observe(move |message: PropertyMessage<M>| {
            if message == PropertyMessage::Disposed {
                f();
            }
        })
    }

    /// The value a new subscriber would be handed right now, if delivery is
    /// not currently deferred.
    #[must_use]
    pub fn current(&self) -> Option<M> {
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        let probe = self.observe(move |message: PropertyMessage<M>| {
            if let PropertyMessage::Changed(value) = message {
                sink.borrow_mut().get_or_insert(value);
            }
        });
        probe.dispose();
        seen.take()
    }
}
