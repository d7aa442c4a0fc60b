#![forbid(unsafe_code)]

//! Per-event operators: transform, select, fold, truncate.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pulse_core::error::OrRaise;
use pulse_core::{ContractViolation, Result};

use super::event_operator;
use crate::reactive::event::EventStream;
use crate::reactive::property::Property;

impl<E: Clone + 'static> EventStream<E> {
    pub fn map<R, F>(&self, f: F) -> EventStream<R>
    where
        R: Clone + 'static,
        F: Fn(E) -> R + 'static,
    {
        let f = Rc::new(f);
        self.lift(move |downstream| {
            let f = Rc::clone(&f);
            event_operator(downstream, move |downstream, event| {
                downstream.on_event(f(event));
            })
        })
    }

    pub fn filter<F>(&self, predicate: F) -> EventStream<E>
    where
        F: Fn(&E) -> bool + 'static,
    {
        let predicate = Rc::new(predicate);
        self.lift(move |downstream| {
            let predicate = Rc::clone(&predicate);
            event_operator(downstream, move |downstream, event| {
                if predicate(&event) {
                    downstream.on_event(event);
                }
            })
        })
    }

    /// Running fold. Each subscriber receives `seed` as soon as it
    /// subscribes, then the accumulated value after every event.
    pub fn scan<A, F>(&self, seed: A, f: F) -> EventStream<A>
    where
        A: Clone + 'static,
        F: Fn(&A, E) -> A + 'static,
    {
        let f = Rc::new(f);
        self.lift(move |downstream| {
            let f = Rc::clone(&f);
            let acc = RefCell::new(seed.clone());
            downstream.on_event(seed.clone());
            event_operator(downstream, move |downstream, event| {
                let next = f(&acc.borrow(), event);
                *acc.borrow_mut() = next.clone();
                downstream.on_event(next);
            })
        })
    }

    /// Running fold without a seed: `f` sees `None` for the first event.
    pub fn scan_optional<A, F>(&self, f: F) -> EventStream<A>
    where
        A: Clone + 'static,
        F: Fn(Option<&A>, E) -> A + 'static,
    {
        let f = Rc::new(f);
        self.lift(move |downstream| {
            let f = Rc::clone(&f);
            let acc: RefCell<Option<A>> = RefCell::new(None);
            event_operator(downstream, move |downstream, event| {
                let next = f(acc.borrow().as_ref(), event);
                *acc.borrow_mut() = Some(next.clone());
                downstream.on_event(next);
            })
        })
    }

    /// Same as [`scan`](Self::scan).
    pub fn accumulate<A, F>(&self, initial: A, f: F) -> EventStream<A>
    where
        A: Clone + 'static,
        F: Fn(&A, E) -> A + 'static,
    {
        self.scan(initial, f)
    }

    /// `f(previous, current)` for every event after the first.
    pub fn changes<R, F>(&self, f: F) -> EventStream<R>
    where
        R: Clone + 'static,
        F: Fn(E, E) -> R + 'static,
    {
        let f = Rc::new(f);
        self.lift(move |downstream| {
            let f = Rc::clone(&f);
            let previous: RefCell<Option<E>> = RefCell::new(None);
            event_operator(downstream, move |downstream, event: E| {
                let old = previous.borrow_mut().replace(event.clone());
                if let Some(old) = old {
                    downstream.on_event(f(old, event));
                }
            })
        })
    }

    /// The first `n` events, then completion.
    ///
    /// Raises [`ContractViolation::ZeroTake`] when `n` is zero.
    #[track_caller]
    pub fn take(&self, n: usize) -> EventStream<E> {
        self.try_take(n).or_raise()
    }

    pub fn try_take(&self, n: usize) -> Result<EventStream<E>> {
        if n == 0 {
            return Err(ContractViolation::ZeroTake);
        }
        Ok(self.lift(move |downstream| {
            let remaining = Cell::new(n);
            event_operator(downstream, move |downstream, event| {
                let left = remaining.get();
                if left == 0 {
                    return;
                }
                remaining.set(left - 1);
                downstream.on_event(event);
                if left == 1 {
                    downstream.on_completed();
                }
            })
        }))
    }

    /// A property starting at `initial` and set to every event of this
    /// stream.
    #[track_caller]
    pub fn to_property(&self, initial: E) -> Property<E>
    where
        E: PartialEq,
    {
        let property = self.runtime().property(initial);
        property.bind_events(self);
        property
    }
}

#[cfg(test)]
mod tests {
    use crate::reactive::{EventMessage, Runtime};
    use pulse_core::{ContractViolation, LocalEventLoop};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn runtime() -> Runtime {
        Runtime::new(Rc::new(LocalEventLoop::new("test")))
    }

    fn collect<E: Clone + 'static>(
        stream: &crate::reactive::EventStream<E>,
    ) -> Rc<RefCell<Vec<EventMessage<E>>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = stream.observe(move |message| sink.borrow_mut().push(message));
        log
    }

    fn events<E: Clone>(log: &Rc<RefCell<Vec<EventMessage<E>>>>) -> Vec<E> {
        log.borrow()
            .iter()
            .filter_map(|message| match message {
                EventMessage::Event(event) => Some(event.clone()),
                EventMessage::Completed => None,
            })
            .collect()
    }

    #[test]
    fn map_and_filter() {
        let runtime = runtime();
        let subject = runtime.subject::<i32>();
        let log = collect(&subject.stream().filter(|n| n % 2 == 1).map(|n| n * 10));
        for n in 1..=5 {
            subject.publish(n);
        }
        assert_eq!(events(&log), vec![10, 30, 50]);
    }

    #[test]
    fn completion_passes_through() {
        let runtime = runtime();
        let log = collect(&runtime.from_iter([1, 2]).map(|n| n + 1));
        assert_eq!(
            *log.borrow(),
            vec![
                EventMessage::Event(2),
                EventMessage::Event(3),
                EventMessage::Completed
            ]
        );
    }

    #[test]
    fn scan_emits_seed_then_running_value() {
        let runtime = runtime();
        let subject = runtime.subject::<i32>();
        let log = collect(&subject.stream().scan(100, |acc, n| acc + n));
        subject.publish(1);
        subject.publish(2);
        assert_eq!(events(&log), vec![100, 101, 103]);
    }

    #[test]
    fn scan_state_is_per_subscriber() {
        let runtime = runtime();
        let subject = runtime.subject::<i32>();
        let sums = subject.stream().scan(0, |acc, n| acc + n);
        let first = collect(&sums);
        subject.publish(5);
        let second = collect(&sums);
        subject.publish(1);
        assert_eq!(events(&first), vec![0, 5, 6]);
        assert_eq!(events(&second), vec![0, 1]);
    }

    #[test]
    fn scan_optional_has_no_seed() {
        let runtime = runtime();
        let subject = runtime.subject::<&str>();
        let log = collect(&subject.stream().scan_optional(|acc: Option<&String>, word| {
            match acc {
                Some(acc) => format!("{acc} {word}"),
                None => word.to_owned(),
            }
        }));
        assert!(log.borrow().is_empty());
        subject.publish("tacos");
        subject.publish("burritos");
        assert_eq!(events(&log), vec!["tacos", "tacos burritos"]);
    }

    #[test]
    fn accumulate_matches_scan() {
        let runtime = runtime();
        let log = collect(&runtime.from_iter([1, 2, 3]).accumulate(0, |acc, n| acc + n));
        assert_eq!(events(&log), vec![0, 1, 3, 6]);
    }

    #[test]
    fn changes_pairs_consecutive_events() {
        let runtime = runtime();
        let log = collect(&runtime.from_iter([1, 4, 9]).changes(|old, new| new - old));
        assert_eq!(events(&log), vec![3, 5]);
    }

    #[test]
    fn take_completes_after_n() {
        let runtime = runtime();
        let subject = runtime.subject();
        let log = collect(&subject.stream().take(2));
        for food in ["tacos", "burritos", "fajitas"] {
            subject.publish(food);
        }
        assert_eq!(
            *log.borrow(),
            vec![
                EventMessage::Event("tacos"),
                EventMessage::Event("burritos"),
                EventMessage::Completed
            ]
        );
        assert!(!subject.has_observers());
    }

    #[test]
    fn take_zero_is_rejected() {
        let runtime = runtime();
        let subject = runtime.subject::<u8>();
        assert_eq!(
            subject.stream().try_take(0).err(),
            Some(ContractViolation::ZeroTake)
        );
    }

    #[test]
    fn to_property_follows_events() {
        let runtime = runtime();
        let subject = runtime.subject();
        let property = subject.stream().to_property("none");
        assert_eq!(property.get(), "none");
        subject.publish("salsa");
        assert_eq!(property.get(), "salsa");
    }
}
