#![forbid(unsafe_code)]

//! The runtime handle every property and event stream is created through.
//!
//! A [`Runtime`] ties together the three things a reactive value needs from
//! its environment: the [`EventLoop`] it belongs to, the
//! [`DispatchCoordinator`] shared with its siblings, and the
//! [`RuntimeConfig`] that shapes logging. Values created through the same
//! runtime take part in the same glitch-protection protocol; values from
//! different runtimes never see each other's dispatches.

use std::fmt;
use std::rc::Rc;

use pulse_core::error::OrRaise;
use pulse_core::{Affinity, EventLoop, Result, Subscription};
use web_time::Duration;

use super::config::RuntimeConfig;
use super::coordinator::{DispatchCoordinator, Flavor};
use super::dispatcher::Dispatcher;
use super::event::{EventStream, EventSubject, FnPublisher};
use super::observer::EventSubscriber;
use super::property::{Property, PropertySource, ValueSource};

struct RuntimeInner {
    coordinator: DispatchCoordinator,
    affinity: Affinity,
    config: RuntimeConfig,
    trace_label: Option<Rc<str>>,
}

/// Factory and shared context for properties and event streams.
///
/// Cloning yields another handle to the **same** runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime bound to `event_loop` with the default configuration.
    ///
    /// Raises a wrong-context violation unless called on `event_loop`.
    #[track_caller]
    pub fn new(event_loop: Rc<dyn EventLoop>) -> Self {
        Self::try_new(event_loop).or_raise()
    }

    pub fn try_new(event_loop: Rc<dyn EventLoop>) -> Result<Self> {
        Self::try_with_config(event_loop, RuntimeConfig::default())
    }

    #[track_caller]
    pub fn with_config(event_loop: Rc<dyn EventLoop>, config: RuntimeConfig) -> Self {
        Self::try_with_config(event_loop, config).or_raise()
    }

    pub fn try_with_config(event_loop: Rc<dyn EventLoop>, config: RuntimeConfig) -> Result<Self> {
        event_loop.check_in_event_loop()?;
        let trace_label = config.trace_dispatch.then(|| Rc::from(config.label.as_str()));
        tracing::debug!(
            runtime = %config.label,
            event_loop = event_loop.name(),
            trace_dispatch = config.trace_dispatch,
            "runtime created"
        );
        Ok(Self {
            inner: Rc::new(RuntimeInner {
                coordinator: DispatchCoordinator::new(),
                affinity: Affinity::new(event_loop),
                config,
                trace_label,
            }),
        })
    }

    #[must_use]
    pub fn coordinator(&self) -> &DispatchCoordinator {
        &self.inner.coordinator
    }

    #[must_use]
    pub fn affinity(&self) -> &Affinity {
        &self.inner.affinity
    }

    #[must_use]
    pub fn event_loop(&self) -> &Rc<dyn EventLoop> {
        self.inner.affinity.event_loop()
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same runtime.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn dispatcher<V: Clone + 'static>(&self, flavor: Flavor) -> Dispatcher<V> {
        Dispatcher::new(
            flavor,
            &self.inner.coordinator,
            self.inner.trace_label.clone(),
        )
    }

    // ── Factories ────────────────────────────────────────────────────

    /// A property holding `initial`.
    #[track_caller]
    pub fn property<M: Clone + PartialEq + 'static>(&self, initial: M) -> Property<M> {
        self.property_with_source(ValueSource::new(initial))
    }

    /// A property that starts out as `None`.
    #[track_caller]
    pub fn optional_property<M: Clone + PartialEq + 'static>(&self) -> Property<Option<M>> {
        self.property(None)
    }

    /// A property whose value lives in `source`.
    ///
    /// The value `source` holds now becomes the property's initial value.
    #[track_caller]
    pub fn property_with_source<M: Clone + PartialEq + 'static>(
        &self,
        source: impl PropertySource<M> + 'static,
    ) -> Property<M> {
        self.affinity().check();
        Property::from_source(self, Box::new(source))
    }

    /// A subject: an event stream you publish into directly.
    #[track_caller]
    pub fn subject<E: Clone + 'static>(&self) -> EventSubject<E> {
        self.affinity().check();
        EventSubject::new(self)
    }

    /// Bridge an external producer into an event stream.
    ///
    /// `producer` runs once per subscriber with that subscriber's handle and
    /// returns the subscription that stops producing. Disposing the
    /// subscriber disposes that subscription; disposing that subscription
    /// from the producer side completes the subscriber.
    pub fn create_stream<E, F>(&self, producer: F) -> EventStream<E>
    where
        E: Clone + 'static,
        F: Fn(EventSubscriber<E>) -> Subscription + 'static,
    {
        EventStream::from_publisher(self, Rc::new(FnPublisher::new(producer)))
    }

    /// A stream that emits every item of `items` to each subscriber, then
    /// completes.
    pub fn from_iter<E, I>(&self, items: I) -> EventStream<E>
    where
        E: Clone + 'static,
        I: IntoIterator<Item = E>,
    {
        let items: Rc<[E]> = items.into_iter().collect();
        self.create_stream(move |subscriber| {
            for item in items.iter() {
                if subscriber.is_disposed() {
                    break;
                }
                subscriber.on_event(item.clone());
            }
            subscriber.on_completed();
            Subscription::disposed()
        })
    }

    // ── Deferred work ────────────────────────────────────────────────

    /// Wrap `f` so the dispatch context current now is restored while it runs.
    pub fn wrap_deferred<F>(&self, f: F) -> impl FnOnce() + 'static
    where
        F: FnOnce() + 'static,
    {
        self.inner.coordinator.wrap_deferred(f)
    }

    /// Schedule `f` on this runtime's event loop after `delay`, carrying the
    /// current dispatch context along.
    pub fn schedule_deferred<F>(&self, delay: Duration, f: F) -> Subscription
    where
        F: FnOnce() + 'static,
    {
        self.event_loop()
            .schedule(delay, Box::new(self.wrap_deferred(f)))
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("label", &self.inner.config.label)
            .field("event_loop", &self.event_loop().name())
            .field("coordinator", &self.inner.coordinator)
            .finish()
    }
}
