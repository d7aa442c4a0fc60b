#![forbid(unsafe_code)]

//! The serialization core behind every property and event stream.
//!
//! A [`Dispatcher`] owns an ordered list of subscriber slots and delivers each
//! value to a snapshot of them while holding its dispatching flag. The two
//! [`Flavor`]s differ as follows:
//!
//! | | Property | Event |
//! |---|---|---|
//! | slot order | bindings first, then insertion | insertion |
//! | per-slot delivery | run-or-queued (pausable) | immediate |
//! | around a dispatch | nothing | pauses every property dispatcher |
//!
//! Both flavors raise the coordinator's "dispatching to binding" flag while a
//! binding slot runs, which is what lets a binding write a property in the
//! middle of a dispatch.
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: caught and logged; siblings still receive the
//!   value and the dispatching flag is restored.
//! - **Nested delivery to a busy slot** (a slot's own callback causes another
//!   delivery to it): queued on the slot and delivered, in order, as soon as
//!   the slot's callback returns.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use pulse_core::callbacks::run_isolated;
use pulse_core::error::OrRaise;
use pulse_core::{ContractViolation, Result, Subscription};

use super::coordinator::{DispatchCoordinator, DispatchState, FlagGuard, Flavor};
use super::observer::Role;

/// What a dispatcher hands to a subscriber slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<V> {
    Next(V),
    Terminal,
}

type Sink<V> = Box<dyn FnMut(Delivery<V>)>;

struct Slot<V> {
    id: u64,
    role: Role,
    active: Cell<bool>,
    backlog: RefCell<VecDeque<Delivery<V>>>,
    sink: RefCell<Sink<V>>,
}

impl<V> Slot<V> {
    /// Deliver to the sink, or queue behind the delivery already running in
    /// it. The running delivery drains the backlog in FIFO order.
    fn deliver(&self, state: &DispatchState, delivery: Delivery<V>) {
        if !self.active.get() {
            return;
        }
        let Ok(mut sink) = self.sink.try_borrow_mut() else {
            tracing::debug!(
                dispatcher = state.id(),
                slot = self.id,
                "queueing nested delivery to busy subscriber"
            );
            self.backlog.borrow_mut().push_back(delivery);
            return;
        };
        let _binding = FlagGuard::set(state.to_binding_flag(), self.role.is_binding());
        let mut next = Some(delivery);
        while let Some(delivery) = next.take() {
            let terminal = matches!(delivery, Delivery::Terminal);
            run_isolated("subscriber", || (*sink)(delivery));
            if terminal || !self.active.get() {
                self.active.set(false);
                self.backlog.borrow_mut().clear();
                return;
            }
            next = self.backlog.borrow_mut().pop_front();
        }
    }
}

struct DispatcherInner<V> {
    state: Rc<DispatchState>,
    coordinator: DispatchCoordinator,
    trace: Option<Rc<str>>,
    slots: RefCell<Vec<Rc<Slot<V>>>>,
    side: RefCell<Vec<Subscription>>,
    next_slot: Cell<u64>,
}

impl<V: Clone + 'static> DispatcherInner<V> {
    fn deliver(&self, slot: &Rc<Slot<V>>, delivery: Delivery<V>) {
        match self.state.flavor() {
            Flavor::Property => {
                let state = Rc::clone(&self.state);
                let slot = Rc::clone(slot);
                self.state
                    .run_or_queue(move || slot.deliver(&state, delivery));
            }
            Flavor::Event => slot.deliver(&self.state, delivery),
        }
    }

    fn deliver_all(&self, value: V) {
        if self.state.is_disposed() {
            return;
        }
        let slots: Vec<_> = self.slots.borrow().clone();
        if let Some(label) = &self.trace {
            tracing::trace!(
                runtime = %label,
                dispatcher = self.state.id(),
                flavor = ?self.state.flavor(),
                subscribers = slots.len(),
                "dispatch"
            );
        }
        for slot in &slots {
            self.deliver(slot, Delivery::Next(value.clone()));
        }
    }

    fn remove_slot(&self, id: u64) {
        let removed = {
            let mut slots = self.slots.borrow_mut();
            slots
                .iter()
                .position(|slot| slot.id == id)
                .map(|index| slots.remove(index))
        };
        if let Some(slot) = removed {
            slot.active.set(false);
        }
    }
}

impl<V> Drop for DispatcherInner<V> {
    fn drop(&mut self) {
        // Dropped without `dispose`: side disposables still go with us.
        for subscription in self.side.get_mut().drain(..) {
            subscription.dispose();
        }
        self.coordinator.unregister(self.state.id());
    }
}

/// Ordered fan-out of values to subscriber slots.
///
/// Cloning yields another handle to the **same** dispatcher.
pub struct Dispatcher<V> {
    inner: Rc<DispatcherInner<V>>,
}

impl<V> Clone for Dispatcher<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V: Clone + 'static> Dispatcher<V> {
    /// Create a dispatcher registered with `coordinator`.
    ///
    /// When `trace` is set, each dispatch emits a `TRACE` event carrying it
    /// as the runtime label.
    #[must_use]
    pub fn new(flavor: Flavor, coordinator: &DispatchCoordinator, trace: Option<Rc<str>>) -> Self {
        let state = DispatchState::new(flavor);
        coordinator.register(&state);
        Self {
            inner: Rc::new(DispatcherInner {
                state,
                coordinator: coordinator.clone(),
                trace,
                slots: RefCell::new(Vec::new()),
                side: RefCell::new(Vec::new()),
                next_slot: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.state.id()
    }

    #[must_use]
    pub fn flavor(&self) -> Flavor {
        self.inner.state.flavor()
    }

    #[must_use]
    pub fn state(&self) -> &Rc<DispatchState> {
        &self.inner.state
    }

    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        self.inner.state.is_dispatching()
    }

    #[must_use]
    pub fn is_dispatching_to_binding(&self) -> bool {
        self.inner.state.is_dispatching_to_binding()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.state.is_disposed()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.state.is_paused()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Deliver `value` to every current subscriber, or queue the dispatch
    /// while paused.
    #[track_caller]
    pub fn dispatch(&self, value: V) {
        self.try_dispatch(value).or_raise();
    }

    pub fn try_dispatch(&self, value: V) -> Result<()> {
        if self.is_disposed() {
            return Err(ContractViolation::DispatchAfterDispose {
                dispatcher: self.id(),
            });
        }
        // Released after the dispatching flag, so queued property updates
        // flush once this dispatch has fully unwound.
        let _paused = (self.flavor() == Flavor::Event)
            .then(|| self.inner.coordinator.pause_property_dispatchers());
        let inner = Rc::clone(&self.inner);
        self.inner
            .state
            .run_or_queue(move || inner.deliver_all(value));
        Ok(())
    }

    /// Add a subscriber slot.
    pub fn subscribe(&self, role: Role, sink: impl FnMut(Delivery<V>) + 'static) -> Subscription {
        self.subscribe_with_replay(role, sink, None)
    }

    /// Add a subscriber slot and deliver `replay` to it alone, through the
    /// same path as a dispatch.
    ///
    /// On a disposed dispatcher the replay and the terminal notification are
    /// delivered immediately and the returned subscription is already
    /// disposed.
    pub fn subscribe_with_replay(
        &self,
        role: Role,
        sink: impl FnMut(Delivery<V>) + 'static,
        replay: Option<V>,
    ) -> Subscription {
        let id = self.inner.next_slot.get();
        self.inner.next_slot.set(id + 1);
        let slot = Rc::new(Slot {
            id,
            role,
            active: Cell::new(true),
            backlog: RefCell::new(VecDeque::new()),
            sink: RefCell::new(Box::new(sink)),
        });

        if self.is_disposed() {
            let state = &self.inner.state;
            let _scope = state.dispatching_scope();
            if let Some(value) = replay {
                slot.deliver(state, Delivery::Next(value));
            }
            slot.deliver(state, Delivery::Terminal);
            return Subscription::disposed();
        }

        {
            let mut slots = self.inner.slots.borrow_mut();
            slots.push(Rc::clone(&slot));
            if self.flavor() == Flavor::Property {
                slots.sort_by_key(|slot| !slot.role.is_binding());
            }
        }

        let weak: Weak<DispatcherInner<V>> = Rc::downgrade(&self.inner);
        let subscription = Subscription::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_slot(id);
            }
        });

        if let Some(value) = replay {
            self.inner.deliver(&slot, Delivery::Next(value));
        }
        subscription
    }

    /// Increase the pause depth; dispatches queue until the matching resume.
    pub fn pause(&self) {
        self.inner.state.pause();
    }

    pub fn resume(&self) {
        self.inner.state.resume();
    }

    /// Dispose `subscription` along with this dispatcher, or when the
    /// dispatcher is dropped.
    ///
    /// An entry disposed on its own is forgotten right away.
    pub fn on_disposed(&self, subscription: Subscription) {
        if self.is_disposed() {
            subscription.dispose();
            return;
        }
        if subscription.is_disposed() {
            return;
        }
        let weak: Weak<DispatcherInner<V>> = Rc::downgrade(&self.inner);
        subscription.on_dispose(move || {
            if let Some(inner) = weak.upgrade() {
                inner.side.borrow_mut().retain(|side| !side.is_disposed());
            }
        });
        self.inner.side.borrow_mut().push(subscription);
    }

    /// Terminal and idempotent: drop queued dispatches, notify every slot,
    /// release side disposables, leave the coordinator.
    pub fn dispose(&self) {
        let state = &self.inner.state;
        if !state.mark_disposed() {
            return;
        }
        let slots = std::mem::take(&mut *self.inner.slots.borrow_mut());
        {
            let _scope = state.dispatching_scope();
            for slot in &slots {
                slot.deliver(state, Delivery::Terminal);
            }
        }
        let side = std::mem::take(&mut *self.inner.side.borrow_mut());
        for subscription in side {
            subscription.dispose();
        }
        self.inner.coordinator.unregister(state.id());
        tracing::debug!(
            dispatcher = state.id(),
            released = slots.len(),
            "dispatcher disposed"
        );
    }
}

impl<V> fmt::Debug for Dispatcher<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.inner.state)
            .field("subscribers", &self.inner.slots.borrow().len())
            .finish()
    }
}
