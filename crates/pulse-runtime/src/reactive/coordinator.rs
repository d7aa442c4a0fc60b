#![forbid(unsafe_code)]

//! Cross-dispatcher coordination.
//!
//! A [`DispatchCoordinator`] knows every live dispatcher created through the
//! same [`Runtime`](super::Runtime) and answers the two questions the glitch
//! protection protocol needs from anywhere in user code:
//!
//! - is *anything* dispatching right now, and
//! - is that dispatch currently inside a binding?
//!
//! A property may only be written while nothing is dispatching, or from
//! inside a binding. Event dispatchers additionally pause every property
//! dispatcher for the extent of their own delivery, so property writes made
//! while handling an event reach property observers only after every sibling
//! handler of that event has run.
//!
//! # Deferred work
//!
//! Work that is scheduled from inside a dispatch and runs later (debounce
//! timers) still logically belongs to that dispatch. [`DispatchSnapshot`]
//! records which dispatchers were dispatching at capture time and re-asserts
//! those flags around the deferred body, reverting to whatever the flags were
//! at run time afterwards.
//!
//! # Registration
//!
//! Dispatchers register themselves on creation and unregister on disposal or
//! drop. Entries are held by [`Weak`] so the coordinator never extends a
//! dispatcher's lifetime.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use pulse_core::{ContractViolation, Result};

// ─── Dispatcher ID generation ────────────────────────────────────────────────

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

fn next_dispatcher_id() -> u64 {
    NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Per-dispatcher state ────────────────────────────────────────────────────

/// Which delivery discipline a dispatcher follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Bindings first, every delivery run-or-queued, pausable.
    Property,
    /// Plain fan-out that pauses property dispatchers while it delivers.
    Event,
}

type Job = Box<dyn FnOnce()>;

/// Restores a flag to its previous value on drop.
pub(crate) struct FlagGuard<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> FlagGuard<'a> {
    pub(crate) fn set(flag: &'a Cell<bool>, value: bool) -> Self {
        let previous = flag.replace(value);
        Self { flag, previous }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

/// The flags and pending queue the coordinator sees for one dispatcher.
pub struct DispatchState {
    id: u64,
    flavor: Flavor,
    dispatching: Cell<bool>,
    to_binding: Cell<bool>,
    disposed: Cell<bool>,
    pause_depth: Cell<u32>,
    pending: RefCell<VecDeque<Job>>,
}

impl DispatchState {
    pub(crate) fn new(flavor: Flavor) -> Rc<Self> {
        Rc::new(Self {
            id: next_dispatcher_id(),
            flavor,
            dispatching: Cell::new(false),
            to_binding: Cell::new(false),
            disposed: Cell::new(false),
            pause_depth: Cell::new(0),
            pending: RefCell::new(VecDeque::new()),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    #[inline]
    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.get()
    }

    #[inline]
    #[must_use]
    pub fn is_dispatching_to_binding(&self) -> bool {
        self.to_binding.get()
    }

    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    #[inline]
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause_depth.get() > 0
    }

    /// Number of units waiting for the dispatcher to resume.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub(crate) fn to_binding_flag(&self) -> &Cell<bool> {
        &self.to_binding
    }

    /// Mark disposed, dropping any queued units. Returns `false` if already
    /// disposed.
    pub(crate) fn mark_disposed(&self) -> bool {
        if self.disposed.replace(true) {
            return false;
        }
        let dropped = std::mem::take(&mut *self.pending.borrow_mut());
        drop(dropped);
        true
    }

    /// Hold the dispatching flag for the guard's lifetime.
    pub(crate) fn dispatching_scope(&self) -> FlagGuard<'_> {
        FlagGuard::set(&self.dispatching, true)
    }

    /// Run `job` with the dispatching flag held, or queue it while paused.
    pub(crate) fn run_or_queue(&self, job: impl FnOnce() + 'static) {
        if self.is_paused() {
            self.pending.borrow_mut().push_back(Box::new(job));
        } else {
            let _scope = self.dispatching_scope();
            job();
        }
    }

    pub(crate) fn pause(&self) {
        self.pause_depth.set(self.pause_depth.get() + 1);
    }

    /// Leave one pause level; at depth zero, drain the queue in FIFO order.
    ///
    /// Units queued while draining run in the same pass. Draining stops early
    /// if one of the units pauses the dispatcher again.
    pub(crate) fn resume(&self) {
        let depth = self.pause_depth.get();
        if depth == 0 {
            return;
        }
        self.pause_depth.set(depth - 1);
        while !self.is_paused() {
            let Some(job) = self.pending.borrow_mut().pop_front() else {
                break;
            };
            let _scope = self.dispatching_scope();
            job();
        }
    }
}

impl fmt::Debug for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchState")
            .field("id", &self.id)
            .field("flavor", &self.flavor)
            .field("dispatching", &self.dispatching.get())
            .field("to_binding", &self.to_binding.get())
            .field("disposed", &self.disposed.get())
            .field("pause_depth", &self.pause_depth.get())
            .field("pending", &self.pending_len())
            .finish()
    }
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct CoordinatorInner {
    entries: RefCell<Vec<(u64, Weak<DispatchState>)>>,
}

/// The registry of live dispatchers shared by one runtime.
///
/// Cloning yields another handle to the **same** registry.
#[derive(Clone, Default)]
pub struct DispatchCoordinator {
    inner: Rc<CoordinatorInner>,
}

impl DispatchCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, state: &Rc<DispatchState>) {
        self.inner
            .entries
            .borrow_mut()
            .push((state.id(), Rc::downgrade(state)));
        tracing::debug!(
            dispatcher = state.id(),
            flavor = ?state.flavor(),
            "dispatcher registered"
        );
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.inner
            .entries
            .borrow_mut()
            .retain(|(entry, weak)| *entry != id && weak.strong_count() > 0);
    }

    /// Strong handles to every registered dispatcher still alive, in
    /// registration order.
    #[must_use]
    pub fn live_dispatchers(&self) -> Vec<Rc<DispatchState>> {
        self.inner
            .entries
            .borrow()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .filter(|state| !state.is_disposed())
            .collect()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live_dispatchers().len()
    }

    /// Whether any live dispatcher is mid-dispatch.
    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        self.any(DispatchState::is_dispatching)
    }

    /// Whether any live dispatcher is currently delivering to a binding.
    #[must_use]
    pub fn is_dispatching_to_binding(&self) -> bool {
        self.any(DispatchState::is_dispatching_to_binding)
    }

    fn any(&self, predicate: impl Fn(&DispatchState) -> bool) -> bool {
        self.inner
            .entries
            .borrow()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .any(|state| !state.is_disposed() && predicate(&state))
    }

    /// The glitch-protection gate for property writes.
    ///
    /// Fails with [`ContractViolation::MutationDuringDispatch`] while a
    /// dispatch is in flight, unless that dispatch is delivering to a binding.
    pub fn check_can_dispatch(&self) -> Result<()> {
        if !self.is_dispatching() || self.is_dispatching_to_binding() {
            Ok(())
        } else {
            Err(ContractViolation::MutationDuringDispatch)
        }
    }

    /// Pause every live property dispatcher.
    ///
    /// The returned token resumes exactly the dispatchers it paused, either
    /// through [`PausedDispatchers::resume`] or on drop. Dispatchers created
    /// after the call are unaffected.
    #[must_use = "dropping the token resumes the paused dispatchers"]
    pub fn pause_property_dispatchers(&self) -> PausedDispatchers {
        let paused: Vec<_> = self
            .live_dispatchers()
            .into_iter()
            .filter(|state| state.flavor() == Flavor::Property)
            .collect();
        for state in &paused {
            state.pause();
        }
        PausedDispatchers { paused }
    }

    /// Capture which dispatchers are dispatching right now.
    #[must_use]
    pub fn snapshot(&self) -> DispatchSnapshot {
        let captured = self
            .live_dispatchers()
            .into_iter()
            .filter(|state| state.is_dispatching())
            .map(|state| CapturedDispatch {
                to_binding: state.is_dispatching_to_binding(),
                state: Rc::downgrade(&state),
            })
            .collect();
        DispatchSnapshot { captured }
    }

    /// Wrap `f` so that, whenever it runs, the dispatch context that exists
    /// now is re-asserted for its duration.
    pub fn wrap_deferred<F>(&self, f: F) -> impl FnOnce() + 'static
    where
        F: FnOnce() + 'static,
    {
        let snapshot = self.snapshot();
        move || {
            let _applied = snapshot.apply();
            f();
        }
    }
}

impl fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("live", &self.live_count())
            .field("dispatching", &self.is_dispatching())
            .finish()
    }
}

// ─── Pause token ─────────────────────────────────────────────────────────────

/// Property dispatchers paused by one event dispatch.
pub struct PausedDispatchers {
    paused: Vec<Rc<DispatchState>>,
}

impl PausedDispatchers {
    #[must_use]
    pub fn len(&self) -> usize {
        self.paused.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paused.is_empty()
    }

    /// Resume now, flushing each dispatcher's queue in pause order.
    pub fn resume(self) {}
}

impl Drop for PausedDispatchers {
    fn drop(&mut self) {
        for state in std::mem::take(&mut self.paused) {
            state.resume();
        }
    }
}

impl fmt::Debug for PausedDispatchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.paused.iter().map(|state| state.id()))
            .finish()
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

struct CapturedDispatch {
    state: Weak<DispatchState>,
    to_binding: bool,
}

/// The dispatch context captured at one instant.
pub struct DispatchSnapshot {
    captured: Vec<CapturedDispatch>,
}

impl DispatchSnapshot {
    /// Number of dispatchers that were dispatching at capture time.
    #[must_use]
    pub fn len(&self) -> usize {
        self.captured.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }

    /// Force the captured flags on; the guard restores the flags found at
    /// apply time when dropped. Dispatchers disposed or dropped since capture
    /// are skipped.
    #[must_use = "dropping the guard reverts the snapshot immediately"]
    pub fn apply(&self) -> AppliedSnapshot {
        let restore = self
            .captured
            .iter()
            .filter_map(|captured| {
                let state = captured.state.upgrade()?;
                if state.is_disposed() {
                    return None;
                }
                let previous = (
                    state.dispatching.replace(true),
                    state.to_binding.replace(captured.to_binding),
                );
                Some((state, previous))
            })
            .collect();
        AppliedSnapshot { restore }
    }
}

impl fmt::Debug for DispatchSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchSnapshot")
            .field("captured", &self.captured.len())
            .finish()
    }
}

/// Reverts an applied [`DispatchSnapshot`] on drop.
pub struct AppliedSnapshot {
    restore: Vec<(Rc<DispatchState>, (bool, bool))>,
}

impl Drop for AppliedSnapshot {
    fn drop(&mut self) {
        for (state, (dispatching, to_binding)) in self.restore.drain(..).rev() {
            state.dispatching.set(dispatching);
            state.to_binding.set(to_binding);
        }
    }
}

impl fmt::Debug for AppliedSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppliedSnapshot")
            .field("restoring", &self.restore.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(coordinator: &DispatchCoordinator, flavor: Flavor) -> Rc<DispatchState> {
        let state = DispatchState::new(flavor);
        coordinator.register(&state);
        state
    }

    #[test]
    fn ids_are_unique() {
        let a = DispatchState::new(Flavor::Property);
        let b = DispatchState::new(Flavor::Property);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn run_or_queue_holds_flag_for_job_extent() {
        let state = DispatchState::new(Flavor::Property);
        let seen = Rc::new(Cell::new(false));
        let (s, st) = (Rc::clone(&seen), Rc::clone(&state));
        state.run_or_queue(move || s.set(st.is_dispatching()));
        assert!(seen.get());
        assert!(!state.is_dispatching());
    }

    #[test]
    fn flag_restored_when_job_panics() {
        let state = DispatchState::new(Flavor::Property);
        let st = Rc::clone(&state);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            st.run_or_queue(|| panic!("observer failed"));
        }));
        assert!(result.is_err());
        assert!(!state.is_dispatching());
    }

    #[test]
    fn paused_units_drain_fifo_on_last_resume() {
        let state = DispatchState::new(Flavor::Property);
        let log = Rc::new(RefCell::new(Vec::new()));
        state.pause();
        state.pause();
        for i in 0..3 {
            let log = Rc::clone(&log);
            state.run_or_queue(move || log.borrow_mut().push(i));
        }
        assert_eq!(state.pending_len(), 3);

        state.resume();
        assert!(log.borrow().is_empty(), "still paused at depth 1");
        state.resume();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn units_queued_while_draining_run_in_same_pass() {
        let state = DispatchState::new(Flavor::Property);
        let log = Rc::new(RefCell::new(Vec::new()));
        state.pause();
        {
            let (log, inner_state) = (Rc::clone(&log), Rc::clone(&state));
            state.run_or_queue(move || {
                log.borrow_mut().push("first");
                inner_state.pause();
                let log = Rc::clone(&log);
                inner_state.run_or_queue(move || log.borrow_mut().push("nested"));
                inner_state.resume();
            });
        }
        state.resume();
        assert_eq!(*log.borrow(), vec!["first", "nested"]);
    }

    #[test]
    fn extra_resume_is_ignored() {
        let state = DispatchState::new(Flavor::Property);
        state.resume();
        assert!(!state.is_paused());
    }

    #[test]
    fn coordinator_sees_dispatching_state() {
        let coordinator = DispatchCoordinator::new();
        let state = registered(&coordinator, Flavor::Event);
        assert!(!coordinator.is_dispatching());
        {
            let _scope = state.dispatching_scope();
            assert!(coordinator.is_dispatching());
            assert_eq!(
                coordinator.check_can_dispatch(),
                Err(ContractViolation::MutationDuringDispatch)
            );
            let _binding = FlagGuard::set(state.to_binding_flag(), true);
            assert!(coordinator.is_dispatching_to_binding());
            assert!(coordinator.check_can_dispatch().is_ok());
        }
        assert!(coordinator.check_can_dispatch().is_ok());
    }

    #[test]
    fn dropped_dispatchers_leave_registry() {
        let coordinator = DispatchCoordinator::new();
        let kept = registered(&coordinator, Flavor::Property);
        {
            let _gone = registered(&coordinator, Flavor::Property);
            assert_eq!(coordinator.live_count(), 2);
        }
        assert_eq!(coordinator.live_count(), 1);
        coordinator.unregister(kept.id());
        assert_eq!(coordinator.live_count(), 0);
    }

    #[test]
    fn disposed_dispatchers_are_not_consulted() {
        let coordinator = DispatchCoordinator::new();
        let state = registered(&coordinator, Flavor::Property);
        let _scope = state.dispatching_scope();
        assert!(state.mark_disposed());
        assert!(!state.mark_disposed());
        assert!(!coordinator.is_dispatching());
    }

    #[test]
    fn pause_token_resumes_only_what_it_paused() {
        let coordinator = DispatchCoordinator::new();
        let before = registered(&coordinator, Flavor::Property);
        let event = registered(&coordinator, Flavor::Event);

        let token = coordinator.pause_property_dispatchers();
        assert_eq!(token.len(), 1);
        assert!(before.is_paused());
        assert!(!event.is_paused());

        let after = registered(&coordinator, Flavor::Property);
        assert!(!after.is_paused());

        token.resume();
        assert!(!before.is_paused());
        assert!(!after.is_paused());
    }

    #[test]
    fn snapshot_reasserts_and_reverts_flags() {
        let coordinator = DispatchCoordinator::new();
        let state = registered(&coordinator, Flavor::Event);

        let snapshot = {
            let _scope = state.dispatching_scope();
            let _binding = FlagGuard::set(state.to_binding_flag(), true);
            coordinator.snapshot()
        };
        assert_eq!(snapshot.len(), 1);
        assert!(!state.is_dispatching());

        {
            let _applied = snapshot.apply();
            assert!(state.is_dispatching());
            assert!(state.is_dispatching_to_binding());
        }
        assert!(!state.is_dispatching());
        assert!(!state.is_dispatching_to_binding());
    }

    #[test]
    fn snapshot_restores_flags_found_at_apply_time() {
        let coordinator = DispatchCoordinator::new();
        let state = registered(&coordinator, Flavor::Property);
        let snapshot = {
            let _scope = state.dispatching_scope();
            coordinator.snapshot()
        };
        let _outer = state.dispatching_scope();
        drop(snapshot.apply());
        assert!(state.is_dispatching(), "flag set at apply time must survive");
    }

    #[test]
    fn wrap_deferred_replays_context() {
        let coordinator = DispatchCoordinator::new();
        let state = registered(&coordinator, Flavor::Event);
        let seen = Rc::new(Cell::new(false));

        let deferred = {
            let _scope = state.dispatching_scope();
            let (seen, coordinator) = (Rc::clone(&seen), coordinator.clone());
            let inner = coordinator.clone();
            coordinator.wrap_deferred(move || seen.set(inner.is_dispatching()))
        };
        assert!(!coordinator.is_dispatching());
        deferred();
        assert!(seen.get());
        assert!(!coordinator.is_dispatching());
    }

    #[test]
    fn snapshot_skips_dropped_dispatchers() {
        let coordinator = DispatchCoordinator::new();
        let snapshot = {
            let state = registered(&coordinator, Flavor::Event);
            let _scope = state.dispatching_scope();
            coordinator.snapshot()
        };
        let applied = snapshot.apply();
        assert!(format!("{applied:?}").contains("restoring: 0"));
    }
}
