#![forbid(unsafe_code)]

//! The event loop contract and a single-threaded timer loop.
//!
//! The reactive runtime asks its environment exactly two things: "am I on the
//! context that owns this value" and "run this task on that context after a
//! delay". [`EventLoop`] is that contract. GUI toolkits plug their own loop in
//! behind it; [`LocalEventLoop`] is the implementation pulse ships, a timer
//! queue owned by one thread that the host drives explicitly.
//!
//! # Deterministic time
//!
//! A loop built with [`LocalEventLoop::lab`] reads time from a [`LabClock`]
//! and only moves forward when [`advance`](LocalEventLoop::advance) or
//! [`run_until_idle`](LocalEventLoop::run_until_idle) is called, so timed
//! operators can be tested without sleeping.
//!
//! ```
//! use pulse_core::{LabClock, LocalEventLoop, EventLoop};
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use web_time::Duration;
//!
//! let clock = LabClock::new();
//! let event_loop = LocalEventLoop::lab("test", &clock);
//! let fired = Rc::new(Cell::new(false));
//! let flag = Rc::clone(&fired);
//! let _timer = event_loop.schedule(Duration::from_millis(10), Box::new(move || flag.set(true)));
//!
//! event_loop.advance(Duration::from_millis(9));
//! assert!(!fired.get());
//! event_loop.advance(Duration::from_millis(1));
//! assert!(fired.get());
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use web_time::{Duration, Instant};

use crate::callbacks::run_isolated;
use crate::error::{ContractViolation, Result};
use crate::subscription::Subscription;

// ─── Contract ────────────────────────────────────────────────────────────────

/// The execution context a property or event stream belongs to.
pub trait EventLoop {
    /// Human-readable name, used in diagnostics.
    fn name(&self) -> &str;

    /// Whether the calling code is running on this loop's context.
    fn is_in_event_loop(&self) -> bool;

    /// Run `task` on this loop after `delay`.
    ///
    /// Disposing the returned subscription before the task runs cancels it.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Subscription;

    /// `Ok` when called from this loop's context.
    fn check_in_event_loop(&self) -> Result<()> {
        if self.is_in_event_loop() {
            Ok(())
        } else {
            Err(ContractViolation::WrongContext {
                event_loop: self.name().to_owned(),
            })
        }
    }
}

// ─── Time source ─────────────────────────────────────────────────────────────

/// Where a [`LocalEventLoop`] reads the current time from.
#[derive(Debug, Clone)]
pub enum TimeSource {
    /// Real wall-clock time.
    Real,
    /// Deterministic lab clock for testing.
    Lab(LabClock),
}

impl TimeSource {
    #[must_use]
    pub fn now(&self) -> Instant {
        match self {
            Self::Real => Instant::now(),
            Self::Lab(clock) => clock.now(),
        }
    }
}

/// A manually-advanceable clock for deterministic tests.
///
/// All loops sharing the same `LabClock` see the same time.
#[derive(Debug, Clone)]
pub struct LabClock {
    epoch: Instant,
    offset_us: Arc<AtomicU64>,
}

impl LabClock {
    /// Create a new lab clock starting at `Instant::now()`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_us: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the lab clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let us = delta.as_micros().min(u64::MAX as u128) as u64;
        self.offset_us.fetch_add(us, Ordering::Release);
    }

    /// Current lab time.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.epoch + self.elapsed()
    }

    /// Time advanced since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.offset_us.load(Ordering::Acquire))
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Local event loop ────────────────────────────────────────────────────────

struct Timer {
    due: Instant,
    seq: u64,
    handle: Subscription,
    task: Box<dyn FnOnce()>,
}

struct LoopInner {
    name: String,
    owner: ThreadId,
    time: TimeSource,
    timers: RefCell<Vec<Timer>>,
    next_seq: Cell<u64>,
}

impl LoopInner {
    fn cancel(&self, seq: u64) {
        let removed = {
            let mut timers = self.timers.borrow_mut();
            timers
                .iter()
                .position(|timer| timer.seq == seq)
                .map(|index| timers.remove(index))
        };
        drop(removed);
    }

    /// Remove the earliest timer due at or before `now`, ties broken by
    /// scheduling order.
    fn pop_due(&self, now: Instant) -> Option<Timer> {
        let mut timers = self.timers.borrow_mut();
        let index = timers
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.due <= now)
            .min_by_key(|(_, timer)| (timer.due, timer.seq))
            .map(|(index, _)| index)?;
        Some(timers.remove(index))
    }

    fn next_due(&self) -> Option<Instant> {
        self.timers.borrow().iter().map(|timer| timer.due).min()
    }
}

/// A single-threaded timer loop.
///
/// The loop belongs to the thread that created it. It never runs anything on
/// its own: the host calls [`run_pending`](Self::run_pending),
/// [`advance`](Self::advance) or [`run_until_idle`](Self::run_until_idle) to
/// fire due tasks. No internal borrow is held while a task runs, so tasks may
/// freely schedule or cancel other tasks.
#[derive(Clone)]
pub struct LocalEventLoop {
    inner: Rc<LoopInner>,
}

impl LocalEventLoop {
    /// A loop driven by wall-clock time.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_time_source(name, TimeSource::Real)
    }

    /// A loop driven by `clock`.
    #[must_use]
    pub fn lab(name: impl Into<String>, clock: &LabClock) -> Self {
        Self::with_time_source(name, TimeSource::Lab(clock.clone()))
    }

    #[must_use]
    pub fn with_time_source(name: impl Into<String>, time: TimeSource) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                name: name.into(),
                owner: thread::current().id(),
                time,
                timers: RefCell::new(Vec::new()),
                next_seq: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn now(&self) -> Instant {
        self.inner.time.now()
    }

    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self.inner.time, TimeSource::Lab(_))
    }

    /// Number of scheduled tasks that have neither run nor been cancelled.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Run every task that is due now, including tasks those tasks schedule
    /// with no delay. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(timer) = self.inner.pop_due(self.now()) {
            timer.handle.dispose();
            run_isolated("scheduled task", timer.task);
            ran += 1;
        }
        ran
    }

    /// Move time forward by `delta`, firing tasks in due order.
    ///
    /// With a lab clock, time is stepped to each task's due instant before it
    /// runs, so a task observes `now()` equal to its deadline. With the real
    /// clock this sleeps until each deadline in turn.
    pub fn advance(&self, delta: Duration) -> usize {
        let target = deadline(self.now(), delta);
        let mut ran = 0;
        while let Some(due) = self.inner.next_due().filter(|due| *due <= target) {
            self.wait_until(due);
            ran += self.run_pending();
        }
        self.wait_until(target);
        ran + self.run_pending()
    }

    /// Fire tasks until none remain, moving time forward as needed.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = self.run_pending();
        while let Some(due) = self.inner.next_due() {
            self.wait_until(due);
            ran += self.run_pending();
        }
        ran
    }

    fn wait_until(&self, instant: Instant) {
        let now = self.now();
        if instant <= now {
            return;
        }
        match &self.inner.time {
            TimeSource::Lab(clock) => clock.advance(instant - now),
            TimeSource::Real => thread::sleep(instant - now),
        }
    }
}

impl EventLoop for LocalEventLoop {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn is_in_event_loop(&self) -> bool {
        thread::current().id() == self.inner.owner
    }

    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Subscription {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);

        let weak: Weak<LoopInner> = Rc::downgrade(&self.inner);
        let handle = Subscription::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cancel(seq);
            }
        });
        self.inner.timers.borrow_mut().push(Timer {
            due: deadline(self.now(), delay),
            seq,
            handle: handle.clone(),
            task,
        });
        handle
    }
}

/// `now + delay`, saturating at the latest instant the platform can hold.
fn deadline(now: Instant, delay: Duration) -> Instant {
    if let Some(due) = now.checked_add(delay) {
        return due;
    }
    let (mut due, mut step) = (now, delay / 2);
    while !step.is_zero() {
        match due.checked_add(step) {
            Some(later) => due = later,
            None => step /= 2,
        }
    }
    due
}

impl fmt::Debug for LocalEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEventLoop")
            .field("name", &self.inner.name)
            .field("lab", &self.is_lab())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}
