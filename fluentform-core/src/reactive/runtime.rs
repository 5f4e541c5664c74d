//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns the dependency graph, the queue of effects waiting for
//! the next flush, and a virtual clock used for timers.
//!
//! # How It Works
//!
//! 1. When a signal, memo or effect is created, it registers a node with the
//!    runtime.
//!
//! 2. When a memo or effect reads a node, the read is recorded in the
//!    [`ReactiveContext`] and turned into graph edges once the computation
//!    returns.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks direct dependents dirty and everything downstream maybe-dirty
//!    b. Queues every reachable effect
//!    c. Leaves memos alone: they are pulled lazily on next access
//!
//! 4. [`Runtime::flush`] runs the queued effects. A maybe-dirty effect first
//!    brings its memo dependencies up to date and is skipped when none of
//!    them produced a different value.
//!
//! # Threading
//!
//! The runtime is thread-local. Every thread owns an isolated reactive
//! graph, which keeps the common single-threaded case free of locking and
//! gives each test its own runtime.
//!
//! # Time
//!
//! Timers run on a virtual clock. The host advances it explicitly through
//! [`Runtime::advance_by`] or [`Runtime::tick`]; due timers fire in
//! deadline order and every timer callback is followed by a flush.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Weak;
use std::time::Duration;

use indexmap::IndexSet;
use smallvec::SmallVec;
use tracing::{trace, warn};

use super::context::ReactiveContext;
use crate::graph::{DirtyState, Node, NodeId, NodeKind, UpdateScheduler};

/// Upper bound on effect runs in a single flush before the queue is dropped.
const MAX_FLUSH_ITERATIONS: usize = 100_000;

/// A computation the runtime can re-run when it is dirty.
pub(crate) trait Reactive {
    /// Re-run the computation. Returns true when its observable value changed.
    fn run(&self) -> bool;
}

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

type TimerCallback = Box<dyn FnOnce()>;

#[derive(Default)]
struct RuntimeState {
    graph: UpdateScheduler,
    reactives: HashMap<NodeId, Weak<dyn Reactive>>,
    pending: IndexSet<NodeId>,
    flushing: bool,
    now: Duration,
    timers: BTreeMap<(Duration, TimerId), TimerCallback>,
    next_timer: u64,
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::default());
}

/// Borrow the runtime state. Returns `None` while the thread-local is being
/// torn down or already borrowed further up the stack.
fn with_state<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> Option<R> {
    RUNTIME
        .try_with(|rt| rt.try_borrow_mut().ok().map(|mut state| f(&mut state)))
        .ok()
        .flatten()
}

/// The thread-local reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Allocate a graph node of the given kind.
    pub(crate) fn create_node(kind: NodeKind) -> NodeId {
        let node = Node::new(kind);
        let id = node.id();
        with_state(|s| s.graph.add_node(node));
        id
    }

    /// Attach the computation behind a derived or effect node.
    pub(crate) fn register(id: NodeId, reactive: Weak<dyn Reactive>) {
        with_state(|s| s.reactives.insert(id, reactive));
    }

    /// Remove a node, its edges and any queued run.
    pub(crate) fn remove_node(id: NodeId) {
        with_state(|s| {
            s.graph.remove_node(id);
            s.reactives.remove(&id);
            s.pending.shift_remove(&id);
        });
    }

    /// Queue a node for the next flush.
    pub(crate) fn schedule(id: NodeId) {
        with_state(|s| {
            if let Some(node) = s.graph.get_node_mut(id) {
                node.mark_dirty();
                s.pending.insert(id);
            }
        });
    }

    /// Propagate a change of `source` through the graph and queue effects.
    pub(crate) fn notify_changed(source: NodeId) {
        with_state(|s| {
            let effects = s.graph.mark_changed(source);
            if !effects.is_empty() {
                trace!(source = source.raw(), effects = effects.len(), "queued effects");
            }
            s.pending.extend(effects);
        });
    }

    /// Run `f` as the computation of `id`, replacing its dependency edges
    /// with whatever `f` reads.
    pub(crate) fn run_tracked<R>(id: NodeId, f: impl FnOnce() -> R) -> R {
        let ctx = ReactiveContext::enter(id);
        let result = f();
        let dependencies = ReactiveContext::take_dependencies();
        drop(ctx);
        with_state(|s| s.graph.set_dependencies(id, &dependencies));
        result
    }

    pub(crate) fn dirty_state(id: NodeId) -> Option<DirtyState> {
        with_state(|s| s.graph.dirty_state(id)).flatten()
    }

    pub(crate) fn dependency_count(id: NodeId) -> usize {
        with_state(|s| s.graph.get_node(id).map(|n| n.dependencies().len()))
            .flatten()
            .unwrap_or(0)
    }

    pub(crate) fn dependent_count(id: NodeId) -> usize {
        with_state(|s| s.graph.get_node(id).map(|n| n.dependents().len()))
            .flatten()
            .unwrap_or(0)
    }

    /// Bring a derived or effect node up to date, re-running it only when
    /// one of its inputs actually changed.
    pub(crate) fn update_if_necessary(id: NodeId) {
        let Some(state) = Self::dirty_state(id) else {
            return;
        };
        if state == DirtyState::Clean {
            return;
        }

        if state == DirtyState::MaybeDirty {
            let dependencies: SmallVec<[NodeId; 8]> = with_state(|s| {
                s.graph
                    .get_node(id)
                    .map(|node| node.dependencies().iter().copied().collect())
            })
            .flatten()
            .unwrap_or_default();

            for dependency in dependencies {
                if with_state(|s| s.graph.kind(dependency)).flatten() == Some(NodeKind::Derived) {
                    Self::update_if_necessary(dependency);
                }
                if Self::dirty_state(id) == Some(DirtyState::Dirty) {
                    break;
                }
            }
        }

        let needs_run = Self::dirty_state(id) == Some(DirtyState::Dirty);
        // Marked clean before running so a write made by the computation
        // itself can queue it again.
        let reactive = with_state(|s| {
            if let Some(node) = s.graph.get_node_mut(id) {
                node.mark_clean();
            }
            if needs_run {
                s.reactives.get(&id).and_then(Weak::upgrade)
            } else {
                None
            }
        })
        .flatten();

        if let Some(reactive) = reactive {
            if reactive.run() {
                with_state(|s| s.graph.mark_dependents_dirty(id));
            }
        }
    }

    /// Run every queued effect until the queue is empty.
    ///
    /// Re-entrant calls (an effect calling `flush`) return immediately; the
    /// outer flush picks up anything they queued.
    pub fn flush() {
        let started = with_state(|s| !std::mem::replace(&mut s.flushing, true)).unwrap_or(false);
        if !started {
            return;
        }
        let _guard = FlushGuard;

        let mut iterations = 0usize;
        loop {
            let next = with_state(|s| s.pending.shift_remove_index(0)).flatten();
            let Some(id) = next else {
                break;
            };
            iterations += 1;
            if iterations > MAX_FLUSH_ITERATIONS {
                warn!(iterations, "flush did not settle, dropping queued effects");
                with_state(|s| s.pending.clear());
                break;
            }
            Self::update_if_necessary(id);
        }
    }

    /// Number of effects waiting for the next flush.
    pub fn pending_effects() -> usize {
        with_state(|s| s.pending.len()).unwrap_or(0)
    }

    /// Number of live nodes in this thread's graph.
    pub fn node_count() -> usize {
        with_state(|s| s.graph.node_count()).unwrap_or(0)
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<NodeId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a tracking reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }

    /// Current virtual time.
    pub fn now() -> Duration {
        with_state(|s| s.now).unwrap_or_default()
    }

    /// Schedule `callback` to run once `delay` of virtual time has elapsed.
    pub fn set_timeout(delay: Duration, callback: impl FnOnce() + 'static) -> TimerId {
        let callback: TimerCallback = Box::new(callback);
        with_state(move |s| {
            let id = TimerId(s.next_timer);
            s.next_timer += 1;
            let deadline = s.now + delay;
            s.timers.insert((deadline, id), callback);
            id
        })
        .unwrap_or(TimerId(u64::MAX))
    }

    /// Cancel a pending timer. Unknown or already fired timers are ignored.
    pub fn clear_timeout(id: TimerId) {
        // The callback is dropped outside the borrow: it may own the last
        // handle to a signal whose drop talks to the runtime again.
        let removed = with_state(|s| {
            let key = s.timers.keys().find(|(_, timer)| *timer == id).copied();
            key.and_then(|key| s.timers.remove(&key))
        })
        .flatten();
        drop(removed);
    }

    /// Number of timers that have not fired yet.
    pub fn pending_timers() -> usize {
        with_state(|s| s.timers.len()).unwrap_or(0)
    }

    /// Advance the virtual clock, firing due timers in deadline order and
    /// flushing after each one.
    pub fn advance_by(duration: Duration) {
        let target = with_state(|s| s.now + duration).unwrap_or_default();
        Self::flush();
        loop {
            let due = with_state(|s| {
                let key = *s.timers.keys().next()?;
                if key.0 > target {
                    return None;
                }
                s.now = s.now.max(key.0);
                s.timers.remove(&key)
            })
            .flatten();
            let Some(callback) = due else {
                break;
            };
            callback();
            Self::flush();
        }
        with_state(|s| s.now = s.now.max(target));
        Self::flush();
    }

    /// Fire zero-delay timers and flush: one turn of the host event loop.
    pub fn tick() {
        Self::advance_by(Duration::ZERO);
    }

    /// Advance until no timers remain.
    pub fn run_until_idle() {
        let mut turns = 0usize;
        while let Some(deadline) =
            with_state(|s| s.timers.keys().next().map(|(deadline, _)| *deadline)).flatten()
        {
            turns += 1;
            if turns > MAX_FLUSH_ITERATIONS {
                warn!("timers kept re-arming, giving up");
                break;
            }
            Self::advance_by(deadline.saturating_sub(Self::now()));
        }
        Self::flush();
    }
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        with_state(|s| s.flushing = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct MockReactive {
        runs: Cell<usize>,
        changes: bool,
    }

    fn mock(kind: NodeKind, changes: bool) -> (NodeId, Rc<MockReactive>) {
        let id = Runtime::create_node(kind);
        let reactive = Rc::new(MockReactive {
            runs: Cell::new(0),
            changes,
        });
        let weak: Weak<dyn Reactive> = Rc::downgrade(&reactive) as Weak<dyn Reactive>;
        Runtime::register(id, weak);
        (id, reactive)
    }

    impl Reactive for MockReactive {
        fn run(&self) -> bool {
            self.runs.set(self.runs.get() + 1);
            self.changes
        }
    }

    #[test]
    fn runtime_registers_and_removes_nodes() {
        let before = Runtime::node_count();
        let (id, _reactive) = mock(NodeKind::Effect, false);
        assert_eq!(Runtime::node_count(), before + 1);

        Runtime::remove_node(id);
        assert_eq!(Runtime::node_count(), before);
    }

    #[test]
    fn notify_queues_effects_until_flush() {
        let source = Runtime::create_node(NodeKind::Source);
        let (effect_id, effect) = mock(NodeKind::Effect, false);
        Runtime::update_if_necessary(effect_id);
        assert_eq!(effect.runs.get(), 1);

        with_state(|s| s.graph.add_edge(source, effect_id));
        Runtime::notify_changed(source);
        assert_eq!(effect.runs.get(), 1);
        assert_eq!(Runtime::pending_effects(), 1);

        Runtime::flush();
        assert_eq!(effect.runs.get(), 2);
        assert_eq!(Runtime::pending_effects(), 0);
    }

    #[test]
    fn unchanged_memo_skips_downstream_effect() {
        let source = Runtime::create_node(NodeKind::Source);
        let (memo_id, memo) = mock(NodeKind::Derived, false);
        let (effect_id, effect) = mock(NodeKind::Effect, false);
        Runtime::update_if_necessary(memo_id);
        Runtime::update_if_necessary(effect_id);

        with_state(|s| {
            s.graph.add_edge(source, memo_id);
            s.graph.add_edge(memo_id, effect_id);
        });

        Runtime::notify_changed(source);
        Runtime::flush();

        assert_eq!(memo.runs.get(), 2);
        assert_eq!(effect.runs.get(), 1);
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let start = Runtime::now();

        let l = log.clone();
        Runtime::set_timeout(Duration::from_millis(20), move || l.borrow_mut().push("late"));
        let l = log.clone();
        Runtime::set_timeout(Duration::from_millis(10), move || l.borrow_mut().push("early"));
        let l = log.clone();
        let cancelled = Runtime::set_timeout(Duration::from_millis(5), move || l.borrow_mut().push("never"));
        Runtime::clear_timeout(cancelled);

        Runtime::advance_by(Duration::from_millis(15));
        assert_eq!(*log.borrow(), vec!["early"]);

        Runtime::run_until_idle();
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert_eq!(Runtime::now(), start + Duration::from_millis(20));
        assert_eq!(Runtime::pending_timers(), 0);
    }
}
