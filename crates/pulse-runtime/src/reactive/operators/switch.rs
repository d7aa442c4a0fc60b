#![forbid(unsafe_code)]

//! Operators over streams of streams: switching, merging, flattening.

use std::cell::Cell;
use std::rc::Rc;

use pulse_core::error::OrRaise;
use pulse_core::{CompositeSubscription, ContractViolation, Result, SerialSubscription};

use crate::reactive::binding::property_binding;
use crate::reactive::event::EventStream;
use crate::reactive::observer::{EventMessage, EventSubscriber};
use crate::reactive::property::{Property, PropertyStream};
use crate::reactive::runtime::Runtime;

impl<E: Clone + 'static> EventStream<E> {
    /// Map each event to a stream and follow only the most recent one.
    ///
    /// Events of a replaced inner stream are dropped. Completes once this
    /// stream and the current inner stream have both completed.
    pub fn switch_map<R, F>(&self, f: F) -> EventStream<R>
    where
        R: Clone + 'static,
        F: Fn(E) -> EventStream<R> + 'static,
    {
        let f = Rc::new(f);
        self.lift(move |downstream: EventSubscriber<R>| {
            let f = Rc::clone(&f);
            let state = Rc::new(SwitchState::default());
            let inner = SerialSubscription::new();
            downstream.subscription().on_dispose({
                let inner = inner.clone();
                move || inner.dispose()
            });

            let role = downstream.role();
            EventSubscriber::with_role(role, move |message: EventMessage<E>| match message {
                EventMessage::Event(event) => {
                    let generation = state.generation.get() + 1;
                    state.generation.set(generation);
                    state.inner_done.set(false);
                    inner.clear();

                    let (state, downstream) = (Rc::clone(&state), downstream.clone());
                    let observer = EventSubscriber::with_role(role, move |message: EventMessage<R>| {
                        if state.generation.get() != generation {
                            return;
                        }
                        match message {
                            EventMessage::Event(value) => downstream.on_event(value),
                            EventMessage::Completed => {
                                state.inner_done.set(true);
                                if state.outer_done.get() {
                                    downstream.on_completed();
                                }
                            }
                        }
                    });
                    inner.set(f(event).subscribe(observer));
                }
                EventMessage::Completed => {
                    state.outer_done.set(true);
                    if state.inner_done.get() {
                        downstream.on_completed();
                    }
                }
            })
        })
    }

    /// A property bound to the property stream `f` returns for the latest
    /// event.
    ///
    /// Each event rebinds the property, dropping the previous binding.
    /// Completion of this stream disposes the property; disposing the
    /// property unsubscribes from this stream.
    #[track_caller]
    pub fn switch_map_property<R, F>(&self, f: F, initial: R) -> Property<R>
    where
        R: Clone + PartialEq + 'static,
        F: Fn(E) -> PropertyStream<R> + 'static,
    {
        let property = self.runtime().property(initial);
        let binding = SerialSubscription::new();
        property.attach(binding.subscription());

        let target = property.downgrade();
        let outer = self.observe(move |message: EventMessage<E>| {
            let Some(target) = target.upgrade() else {
                return;
            };
            match message {
                EventMessage::Event(event) => {
                    binding.set(f(event).observe(property_binding(&target)));
                }
                EventMessage::Completed => target.dispose(),
            }
        });
        property.attach(outer);
        property
    }

    /// Events from this stream and `other`, completing when both have.
    pub fn merge_with(&self, other: &EventStream<E>) -> EventStream<E> {
        self.runtime().merge(vec![self.clone(), other.clone()])
    }
}

struct SwitchState {
    generation: Cell<u64>,
    outer_done: Cell<bool>,
    inner_done: Cell<bool>,
}

impl Default for SwitchState {
    fn default() -> Self {
        Self {
            generation: Cell::new(0),
            outer_done: Cell::new(false),
            // No inner stream yet counts as a completed one.
            inner_done: Cell::new(true),
        }
    }
}

impl Runtime {
    /// Events from every stream in `streams`, completing when all have.
    ///
    /// Raises [`ContractViolation::EmptyMerge`] for an empty list.
    #[track_caller]
    pub fn merge<E: Clone + 'static>(&self, streams: Vec<EventStream<E>>) -> EventStream<E> {
        self.try_merge(streams).or_raise()
    }

    pub fn try_merge<E: Clone + 'static>(
        &self,
        mut streams: Vec<EventStream<E>>,
    ) -> Result<EventStream<E>> {
        match streams.len() {
            0 => Err(ContractViolation::EmptyMerge),
            1 => Ok(streams.remove(0)),
            _ => {
                let streams: Rc<[EventStream<E>]> = streams.into();
                Ok(self.create_stream(move |subscriber: EventSubscriber<E>| {
                    let remaining = Rc::new(Cell::new(streams.len()));
                    let group = CompositeSubscription::new();
                    for stream in streams.iter() {
                        group.add(stream.subscribe(forward_until_all_done(
                            &subscriber,
                            &remaining,
                        )));
                    }
                    group.subscription()
                }))
            }
        }
    }

    /// Events from every stream `streams` emits, completing once `streams`
    /// and every stream it emitted have completed.
    pub fn flatten<E: Clone + 'static>(
        &self,
        streams: &EventStream<EventStream<E>>,
    ) -> EventStream<E> {
        let streams = streams.clone();
        self.create_stream(move |subscriber: EventSubscriber<E>| {
            let remaining = Rc::new(Cell::new(1));
            let group = CompositeSubscription::new();
            let outer = {
                let (group, downstream) = (group.clone(), subscriber.clone());
                let remaining = Rc::clone(&remaining);
                let role = subscriber.role();
                EventSubscriber::with_role(role, move |message: EventMessage<EventStream<E>>| {
                    match message {
                        EventMessage::Event(stream) => {
                            remaining.set(remaining.get() + 1);
                            let forward = forward_until_all_done(&downstream, &remaining);
                            group.add(stream.subscribe(forward));
                        }
                        EventMessage::Completed => complete_one(&downstream, &remaining),
                    }
                })
            };
            group.add(streams.subscribe(outer));
            group.subscription()
        })
    }
}

/// A subscriber forwarding events to `downstream` and counting its own
/// completion against `remaining`.
fn forward_until_all_done<E: Clone + 'static>(
    downstream: &EventSubscriber<E>,
    remaining: &Rc<Cell<usize>>,
) -> EventSubscriber<E> {
    let (downstream, remaining) = (downstream.clone(), Rc::clone(remaining));
    EventSubscriber::with_role(downstream.role(), move |message: EventMessage<E>| match message {
        EventMessage::Event(event) => downstream.on_event(event),
        EventMessage::Completed => complete_one(&downstream, &remaining),
    })
}

fn complete_one<E: 'static>(downstream: &EventSubscriber<E>, remaining: &Cell<usize>) {
    let left = remaining.get().saturating_sub(1);
    remaining.set(left);
    if left == 0 {
        downstream.on_completed();
    }
}

#[cfg(test)]
mod tests {
    use crate::reactive::{EventMessage, EventStream, Runtime};
    use pulse_core::{ContractViolation, LocalEventLoop};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn runtime() -> Runtime {
        Runtime::new(Rc::new(LocalEventLoop::new("test")))
    }

    fn collect<E: Clone + 'static>(stream: &EventStream<E>) -> Rc<RefCell<Vec<EventMessage<E>>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = stream.observe(move |message| sink.borrow_mut().push(message));
        log
    }

    #[test]
    fn switch_map_follows_latest_inner() {
        let runtime = runtime();
        let outer = runtime.subject::<u8>();
        let (a, b) = (runtime.subject::<&str>(), runtime.subject::<&str>());
        let streams = [a.stream(), b.stream()];
        let log = collect(&outer.stream().switch_map(move |i| streams[usize::from(i)].clone()));

        outer.publish(0);
        a.publish("tacos");
        outer.publish(1);
        a.publish("ignored");
        b.publish("burritos");
        assert_eq!(
            *log.borrow(),
            vec![EventMessage::Event("tacos"), EventMessage::Event("burritos")]
        );
        assert!(!a.has_observers());
    }

    #[test]
    fn switch_map_completes_after_outer_and_inner() {
        let runtime = runtime();
        let outer = runtime.subject::<u8>();
        let inner = runtime.subject::<u8>();
        let stream = inner.stream();
        let log = collect(&outer.stream().switch_map(move |_| stream.clone()));

        outer.publish(0);
        outer.dispose();
        assert!(log.borrow().is_empty());
        inner.dispose();
        assert_eq!(*log.borrow(), vec![EventMessage::Completed]);
    }

    #[test]
    fn switch_map_property_rebinds() {
        let runtime = runtime();
        let outer = runtime.subject::<bool>();
        let (left, right) = (runtime.property(1), runtime.property(2));
        let streams = (left.stream(), right.stream());
        let property = outer.stream().switch_map_property(
            move |pick_right| {
                if pick_right {
                    streams.1.clone()
                } else {
                    streams.0.clone()
                }
            },
            0,
        );
        assert_eq!(property.get(), 0);
        outer.publish(false);
        assert_eq!(property.get(), 1);
        outer.publish(true);
        assert_eq!(property.get(), 2);
        left.set(10);
        assert_eq!(property.get(), 2);
        right.set(20);
        assert_eq!(property.get(), 20);
        assert!(!left.has_observers());
    }

    #[test]
    fn switch_map_property_lifecycle() {
        let runtime = runtime();
        let outer = runtime.subject::<u8>();
        let source = runtime.property(5);
        let stream = source.stream();
        let property = outer.stream().switch_map_property(move |_| stream.clone(), 0);
        outer.publish(0);
        assert!(outer.has_observers());
        property.dispose();
        assert!(!outer.has_observers());
        assert!(!source.has_observers());

        let factory = runtime.clone();
        let second = outer
            .stream()
            .switch_map_property(move |_| factory.property(1).stream(), 0);
        outer.dispose();
        assert!(second.is_disposed());
    }

    #[test]
    fn merge_interleaves_and_completes_last() {
        let runtime = runtime();
        let (a, b) = (runtime.subject(), runtime.subject());
        let log = collect(&a.stream().merge_with(&b.stream()));
        a.publish("tacos");
        b.publish("salsa");
        a.dispose();
        b.publish("burritos");
        assert_eq!(log.borrow().len(), 3);
        b.dispose();
        assert_eq!(
            *log.borrow(),
            vec![
                EventMessage::Event("tacos"),
                EventMessage::Event("salsa"),
                EventMessage::Event("burritos"),
                EventMessage::Completed
            ]
        );
    }

    #[test]
    fn merge_rejects_empty_and_passes_single_through() {
        let runtime = runtime();
        assert_eq!(
            runtime.try_merge::<u8>(Vec::new()).err(),
            Some(ContractViolation::EmptyMerge)
        );
        let subject = runtime.subject::<u8>();
        let merged = runtime.merge(vec![subject.stream()]);
        let log = collect(&merged);
        subject.publish(3);
        assert_eq!(*log.borrow(), vec![EventMessage::Event(3)]);
    }

    #[test]
    fn flatten_waits_for_every_stream() {
        let runtime = runtime();
        let outer = runtime.subject::<EventStream<i32>>();
        let inner = runtime.subject::<i32>();
        let log = collect(&runtime.flatten(&outer.stream()));

        outer.publish(runtime.from_iter([1, 2]));
        outer.publish(inner.stream());
        inner.publish(3);
        outer.dispose();
        assert_eq!(log.borrow().len(), 3);
        inner.dispose();
        assert_eq!(
            *log.borrow(),
            vec![
                EventMessage::Event(1),
                EventMessage::Event(2),
                EventMessage::Event(3),
                EventMessage::Completed
            ]
        );
    }
}
