#![forbid(unsafe_code)]

//! E2E tests for callback isolation and its log output.
//!
//! Validates that:
//! 1. A panicking observer does not stop delivery to its siblings.
//! 2. The panic is reported as a `WARN` event on the `pulse::callback` target.
//! 3. No dispatch flag is left raised after a panic.
//! 4. `trace_dispatch` emits one `TRACE` event per dispatch, labelled with the
//!    runtime label.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use pulse_core::LocalEventLoop;
use pulse_runtime::{Runtime, RuntimeConfig};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

// ============================================================================
// Capture layer
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
struct Captured {
    level: String,
    target: String,
    message: String,
    fields: Vec<(String, String)>,
}

impl Captured {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

struct CaptureLayer {
    events: Arc<Mutex<Vec<Captured>>>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Fields<'a>(&'a mut Captured);
        impl tracing::field::Visit for Fields<'_> {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                self.record(field.name(), value.to_owned());
            }

            fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
                self.record(field.name(), value.to_string());
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                self.record(field.name(), format!("{value:?}").trim_matches('"').to_owned());
            }
        }
        impl Fields<'_> {
            fn record(&mut self, name: &str, value: String) {
                if name == "message" {
                    self.0.message = value;
                } else {
                    self.0.fields.push((name.to_owned(), value));
                }
            }
        }

        let metadata = event.metadata();
        let mut captured = Captured {
            level: metadata.level().to_string(),
            target: metadata.target().to_owned(),
            ..Captured::default()
        };
        event.record(&mut Fields(&mut captured));
        self.events.lock().expect("capture lock").push(captured);
    }
}

fn capture() -> (Arc<Mutex<Vec<Captured>>>, tracing::subscriber::DefaultGuard) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(CaptureLayer {
        events: Arc::clone(&events),
    });
    (events, tracing::subscriber::set_default(subscriber))
}

fn runtime(config: RuntimeConfig) -> Runtime {
    Runtime::with_config(Rc::new(LocalEventLoop::new("isolation")), config)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn panicking_observer_is_logged_and_siblings_still_run() {
    let (events, _guard) = capture();
    let runtime = runtime(RuntimeConfig::default());
    let subject = runtime.subject::<u32>();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let _bad = subject.on_event(|n| {
        if n == 2 {
            panic!("observer exploded on {n}");
        }
    });
    let sink = Rc::clone(&seen);
    let _good = subject.on_event(move |n| sink.borrow_mut().push(n));

    for n in 1..=3 {
        subject.publish(n);
    }
    assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    assert!(!runtime.coordinator().is_dispatching());

    let events = events.lock().expect("capture lock");
    let warnings: Vec<_> = events
        .iter()
        .filter(|event| event.target == "pulse::callback")
        .collect();
    assert_eq!(warnings.len(), 1, "expected one callback warning: {events:?}");
    assert_eq!(warnings[0].level, "WARN");
    assert_eq!(warnings[0].field("panic"), Some("observer exploded on 2"));
}

#[test]
fn panicking_binding_target_observer_leaves_gate_open() {
    let (_events, _guard) = capture();
    let runtime = runtime(RuntimeConfig::default());
    let source = runtime.property(0);
    let target = runtime.property(0);
    let _binding = target.bind(&source.stream());
    let _bad = target.on_changed(|n| {
        if n == 1 {
            panic!("target observer exploded");
        }
    });

    source.set(1);
    assert_eq!(target.get(), 1);
    assert!(!runtime.coordinator().is_dispatching());
    assert!(!runtime.coordinator().is_dispatching_to_binding());
    source.set(2);
    assert_eq!(target.get(), 2);
}

#[test]
fn trace_dispatch_labels_each_dispatch() {
    let (events, _guard) = capture();
    let runtime = runtime(
        RuntimeConfig::default()
            .with_label("kitchen")
            .with_trace_dispatch(true),
    );
    let subject = runtime.subject::<&str>();
    let _sub = subject.on_event(|_| {});
    subject.publish("tacos");
    subject.publish("burritos");

    let events = events.lock().expect("capture lock");
    let dispatches: Vec<_> = events
        .iter()
        .filter(|event| event.message == "dispatch")
        .collect();
    assert_eq!(dispatches.len(), 2);
    assert!(dispatches.iter().all(|event| event.level == "TRACE"));
    assert_eq!(dispatches[0].field("runtime"), Some("kitchen"));
    assert_eq!(dispatches[0].field("subscribers"), Some("1"));
}

#[test]
fn trace_dispatch_off_by_default() {
    let (events, _guard) = capture();
    let runtime = runtime(RuntimeConfig::default());
    let property = runtime.property(1);
    property.set(2);

    let events = events.lock().expect("capture lock");
    assert!(events.iter().all(|event| event.message != "dispatch"));
}
