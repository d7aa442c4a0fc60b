#![forbid(unsafe_code)]

//! Property stream operators.
//!
//! Derived streams keep property semantics: each subscriber gets the derived
//! current value on subscription, and a derived value equal to the previous
//! one is not delivered.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pulse_core::error::OrRaise;
use pulse_core::{ContractViolation, Result};

use super::property_operator;
use crate::reactive::change::PropertyChangeEvent;
use crate::reactive::event::EventStream;
use crate::reactive::observer::{PropertyMessage, PropertySubscriber};
use crate::reactive::property::PropertyStream;

impl<M: Clone + PartialEq + 'static> PropertyStream<M> {
    pub fn map<R, F>(&self, f: F) -> PropertyStream<R>
    where
        R: Clone + PartialEq + 'static,
        F: Fn(M) -> R + 'static,
    {
        let f = Rc::new(f);
        self.lift(move |downstream| {
            let f = Rc::clone(&f);
            property_operator(downstream, move |downstream, value| {
                downstream.on_changed(f(value));
            })
        })
    }

    /// `Some(value)` while `predicate` holds, `None` otherwise.
    pub fn filter<F>(&self, predicate: F) -> PropertyStream<Option<M>>
    where
        F: Fn(&M) -> bool + 'static,
    {
        self.map(move |value| predicate(&value).then_some(value))
    }

    /// Whether the value differs from the one held when this stream was
    /// created.
    pub fn is_dirty(&self) -> PropertyStream<bool> {
        let baseline = self.current();
        self.lift(move |downstream| {
            let baseline = RefCell::new(baseline.clone());
            property_operator(downstream, move |downstream, value: M| {
                let dirty = {
                    let mut baseline = baseline.borrow_mut();
                    value != *baseline.get_or_insert_with(|| value.clone())
                };
                downstream.on_changed(dirty);
            })
        })
    }

    /// Whether the value is one of `values`.
    pub fn is(&self, values: impl IntoIterator<Item = M>) -> PropertyStream<bool> {
        let values: Vec<M> = values.into_iter().collect();
        self.map(move |value| values.contains(&value))
    }

    /// The first `n` values, counting the replayed one, then the disposed
    /// notification.
    ///
    /// Raises [`ContractViolation::ZeroTake`] when `n` is zero.
    #[track_caller]
    pub fn take(&self, n: usize) -> PropertyStream<M> {
        self.try_take(n).or_raise()
    }

    pub fn try_take(&self, n: usize) -> Result<PropertyStream<M>> {
        if n == 0 {
            return Err(ContractViolation::ZeroTake);
        }
        Ok(self.lift(move |downstream: PropertySubscriber<M>| {
            let remaining = Cell::new(n);
            property_operator(downstream, move |downstream, value| {
                let left = remaining.get();
                if left == 0 {
                    return;
                }
                remaining.set(left - 1);
                downstream.on_changed(value);
                if left == 1 {
                    downstream.on_disposed();
                }
            })
        }))
    }

    /// Every transition as an old/new pair. Completes when the property is
    /// disposed.
    pub fn changes(&self) -> EventStream<PropertyChangeEvent<M>> {
        let source = self.clone();
        self.runtime().create_stream(move |subscriber| {
            let previous: RefCell<Option<M>> = RefCell::new(None);
            let sink = subscriber.clone();
            let upstream =
                PropertySubscriber::with_role(subscriber.role(), move |message: PropertyMessage<M>| {
                    match message {
                        PropertyMessage::Changed(value) => {
                            let old = previous.borrow_mut().replace(value.clone());
                            if let Some(old) = old
                                && let Ok(change) = PropertyChangeEvent::try_new(old, value)
                            {
                                sink.on_event(change);
                            }
                        }
                        PropertyMessage::Disposed => sink.on_completed(),
                    }
                });
            source.subscribe(upstream)
        })
    }

    /// The current value, then every change. Completes when the property is
    /// disposed.
    pub fn values(&self) -> EventStream<M> {
        let source = self.clone();
        self.runtime().create_stream(move |subscriber| {
            let sink = subscriber.clone();
            let upstream =
                PropertySubscriber::with_role(subscriber.role(), move |message: PropertyMessage<M>| {
                    match message {
                        PropertyMessage::Changed(value) => sink.on_event(value),
                        PropertyMessage::Disposed => sink.on_completed(),
                    }
                });
            source.subscribe(upstream)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::reactive::{EventMessage, PropertyMessage, PropertyStream, Runtime};
    use pulse_core::{ContractViolation, LocalEventLoop};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn runtime() -> Runtime {
        Runtime::new(Rc::new(LocalEventLoop::new("test")))
    }

    fn collect<M: Clone + PartialEq + 'static>(stream: &PropertyStream<M>) -> Rc<RefCell<Vec<M>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = stream.on_changed(move |value| sink.borrow_mut().push(value));
        log
    }

    #[test]
    fn map_replays_and_suppresses_duplicates() {
        let runtime = runtime();
        let count = runtime.property(1);
        let log = collect(&count.stream().map(|n| n / 10));
        count.set(5);
        count.set(12);
        count.set(15);
        count.set(20);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn filter_yields_option() {
        let runtime = runtime();
        let word = runtime.property("tacos");
        let log = collect(&word.stream().filter(|w| w.starts_with('t')));
        word.set("burritos");
        word.set("tamales");
        assert_eq!(*log.borrow(), vec![Some("tacos"), None, Some("tamales")]);
    }

    #[test]
    fn is_dirty_compares_to_creation_value() {
        let runtime = runtime();
        let name = runtime.property("salsa");
        let dirty = name.stream().is_dirty();
        name.set("guacamole");
        let log = collect(&dirty);
        name.set("salsa");
        name.set("queso");
        assert_eq!(*log.borrow(), vec![true, false, true]);
    }

    #[test]
    fn is_checks_membership() {
        let runtime = runtime();
        let food = runtime.property("tacos");
        let log = collect(&food.stream().is(["burritos", "fajitas"]));
        food.set("fajitas");
        food.set("burritos");
        food.set("salsa");
        assert_eq!(*log.borrow(), vec![false, true, false]);
    }

    #[test]
    fn take_counts_replay() {
        let runtime = runtime();
        let food = runtime.property("tacos");
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = food
            .stream()
            .take(2)
            .observe(move |message| sink.borrow_mut().push(message));
        food.set("burritos");
        food.set("fajitas");
        assert_eq!(
            *log.borrow(),
            vec![
                PropertyMessage::Changed("tacos"),
                PropertyMessage::Changed("burritos"),
                PropertyMessage::Disposed
            ]
        );
        assert!(!food.has_observers());
    }

    #[test]
    fn take_zero_is_rejected() {
        let runtime = runtime();
        let food = runtime.property(0);
        assert_eq!(
            food.stream().try_take(0).err(),
            Some(ContractViolation::ZeroTake)
        );
    }

    #[test]
    fn changes_pair_old_and_new() {
        let runtime = runtime();
        let food = runtime.property("tacos");
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = food
            .stream()
            .changes()
            .on_event(move |change| sink.borrow_mut().push(change));
        food.set("burritos");
        food.set("fajitas");

        let log = log.borrow();
        let pairs: Vec<_> = log
            .iter()
            .map(|change| (*change.old_value(), *change.new_value()))
            .collect();
        assert_eq!(pairs, vec![("tacos", "burritos"), ("burritos", "fajitas")]);
        assert!(log[0].sequence() < log[1].sequence());
    }

    #[test]
    fn values_replay_then_complete_on_dispose() {
        let runtime = runtime();
        let food = runtime.property("tacos");
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = food
            .stream()
            .values()
            .observe(move |message| sink.borrow_mut().push(message));
        food.set("burritos");
        food.dispose();
        assert_eq!(
            *log.borrow(),
            vec![
                EventMessage::Event("tacos"),
                EventMessage::Event("burritos"),
                EventMessage::Completed
            ]
        );
    }
}
