#![forbid(unsafe_code)]

//! Observers that copy values into a property.
//!
//! A binding is an ordinary observer carrying [`Role::Binding`]. The dispatch
//! engine delivers to it before any plain observer of the same property and
//! lets its `set` through the mutation-during-dispatch gate, so a derived
//! property is already up to date when plain observers run.
//!
//! # Invariants
//!
//! 1. A binding never keeps its target alive; once the target is dropped the
//!    binding does nothing.
//! 2. A rejected write is logged at `WARN` and never raised inside the
//!    dispatch that carried it.
//!
//! [`Role::Binding`]: super::observer::Role::Binding

use super::observer::{BindingObserver, EventMessage, PropertyMessage};
use super::property::{Property, WeakProperty};

/// Observer that mirrors property values into `target`.
pub(crate) fn property_binding<M>(
    target: &Property<M>,
) -> BindingObserver<impl FnMut(PropertyMessage<M>) + 'static>
where
    M: Clone + PartialEq + 'static,
{
    let target = target.downgrade();
    BindingObserver(move |message: PropertyMessage<M>| {
        if let PropertyMessage::Changed(value) = message {
            write(&target, value);
        }
    })
}

/// Observer that sets `target` to every event.
pub(crate) fn event_binding<M>(
    target: &Property<M>,
) -> BindingObserver<impl FnMut(EventMessage<M>) + 'static>
where
    M: Clone + PartialEq + 'static,
{
    let target = target.downgrade();
    BindingObserver(move |message: EventMessage<M>| {
        if let EventMessage::Event(value) = message {
            write(&target, value);
        }
    })
}

fn write<M: Clone + PartialEq + 'static>(target: &WeakProperty<M>, value: M) {
    let Some(target) = target.upgrade() else {
        return;
    };
    if let Err(violation) = target.try_set(value) {
        tracing::warn!(%violation, "binding failed to update its target");
    }
}
