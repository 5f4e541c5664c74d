//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a dependency changes, the memo is marked dirty (direct input) or
//!    maybe dirty (an upstream memo changed).
//!
//! 4. On next access, the runtime re-checks whether inputs actually changed.
//!
//! 5. If inputs changed, recompute. Otherwise, mark clean and return cache.
//!
//! A recomputation that yields a value equal to the cached one does not
//! dirty anything downstream.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::context::{untracked, ReactiveContext};
use super::runtime::{Reactive, Runtime};
use super::signal::{default_equal, CellSource, EqualFn, ReadSignal};
use crate::graph::{DirtyState, NodeId, NodeKind};

type ComputeFn<T> = Box<dyn Fn(Option<&T>) -> T>;

/// A cached derived value that recomputes only when dependencies change.
pub struct Memo<T: 'static> {
    inner: Rc<MemoInner<T>>,
}

struct MemoInner<T> {
    id: NodeId,
    compute: ComputeFn<T>,
    value: RefCell<Option<T>>,
    equal: EqualFn<T>,
}

impl<T: Clone + PartialEq + 'static> Memo<T> {
    /// Create a new memo with the given computation.
    ///
    /// The computation is not run until the memo is first accessed.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self::build(Box::new(move |_| compute()), default_equal())
    }

    /// Create a memo whose computation sees its previous value.
    pub fn with_previous(compute: impl Fn(Option<&T>) -> T + 'static) -> Self {
        Self::build(Box::new(compute), default_equal())
    }
}

impl<T: Clone + 'static> Memo<T> {
    /// Create a memo with a custom equality function.
    pub fn with_equality(compute: impl Fn() -> T + 'static, equal: EqualFn<T>) -> Self {
        Self::build(Box::new(move |_| compute()), equal)
    }

    fn build(compute: ComputeFn<T>, equal: EqualFn<T>) -> Self {
        let inner = Rc::new(MemoInner {
            id: Runtime::create_node(NodeKind::Derived),
            compute,
            value: RefCell::new(None),
            equal,
        });
        let weak: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        Runtime::register(inner.id, weak);
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the memo's value, computing it if necessary.
    pub fn get(&self) -> T {
        self.inner.read()
    }

    /// Get the value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.read_untracked()
    }

    /// Get the current dirty state.
    pub fn state(&self) -> DirtyState {
        Runtime::dirty_state(self.inner.id).unwrap_or(DirtyState::Clean)
    }

    /// Get the number of nodes currently depending on this memo.
    pub fn dependent_count(&self) -> usize {
        Runtime::dependent_count(self.inner.id)
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal::from_source(self.inner.clone())
    }
}

impl<T: Clone + 'static> MemoInner<T> {
    fn current(&self) -> T {
        Runtime::update_if_necessary(self.id);
        let cached = self.value.borrow().clone();
        match cached {
            Some(value) => value,
            None => {
                // Runtime unavailable (thread teardown): compute directly.
                let value = untracked(|| (self.compute)(None));
                *self.value.borrow_mut() = Some(value.clone());
                value
            }
        }
    }
}

impl<T: Clone + 'static> Reactive for MemoInner<T> {
    fn run(&self) -> bool {
        let previous = self.value.borrow().clone();
        let next = Runtime::run_tracked(self.id, || (self.compute)(previous.as_ref()));
        let changed = match &previous {
            Some(previous) => !(self.equal)(previous, &next),
            None => true,
        };
        if changed {
            let old = self.value.replace(Some(next));
            drop(old);
        }
        changed
    }
}

impl<T: Clone + 'static> CellSource<T> for MemoInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn read(&self) -> T {
        ReactiveContext::track_dependency(self.id);
        self.current()
    }

    fn read_untracked(&self) -> T {
        self.current()
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        Runtime::remove_node(self.id);
    }
}

impl<T: 'static> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> From<Memo<T>> for ReadSignal<T> {
    fn from(memo: Memo<T>) -> Self {
        memo.read_only()
    }
}

impl<T: Clone + Debug + 'static> Debug for Memo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::cell::Cell;

    #[test]
    fn memo_computes_on_first_access() {
        let compute_count = Rc::new(Cell::new(0));
        let count = compute_count.clone();

        let memo = Memo::new(move || {
            count.set(count.get() + 1);
            42
        });

        assert!(!memo.has_value());
        assert_eq!(compute_count.get(), 0);

        assert_eq!(memo.get(), 42);
        assert_eq!(compute_count.get(), 1);
        assert!(memo.has_value());
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let compute_count = Rc::new(Cell::new(0));
        let count = compute_count.clone();

        let memo = Memo::new(move || {
            count.set(count.get() + 1);
            42
        });

        memo.get();
        memo.get();
        memo.get();

        assert_eq!(compute_count.get(), 1);
        assert_eq!(memo.state(), DirtyState::Clean);
    }

    #[test]
    fn memo_recomputes_when_dependency_changes() {
        let source = Signal::new(2);
        let s = source.clone();
        let memo = Memo::new(move || s.get() * 10);

        assert_eq!(memo.get(), 20);
        source.set(3);
        assert_eq!(memo.state(), DirtyState::Dirty);
        assert_eq!(memo.get(), 30);
    }

    #[test]
    fn memo_chain_skips_unchanged_values() {
        let source = Signal::new(1);
        let s = source.clone();
        let parity = Memo::new(move || s.get() % 2);

        let downstream_runs = Rc::new(Cell::new(0));
        let runs = downstream_runs.clone();
        let p = parity.clone();
        let label = Memo::new(move || {
            runs.set(runs.get() + 1);
            if p.get() == 0 { "even" } else { "odd" }
        });

        assert_eq!(label.get(), "odd");
        source.set(3);
        assert_eq!(label.get(), "odd");
        assert_eq!(downstream_runs.get(), 1);

        source.set(4);
        assert_eq!(label.get(), "even");
        assert_eq!(downstream_runs.get(), 2);
    }

    #[test]
    fn memo_sees_previous_value() {
        let source = Signal::new(5);
        let s = source.clone();
        let running_max = Memo::with_previous(move |prev: Option<&i32>| {
            let v = s.get();
            prev.map_or(v, |p| (*p).max(v))
        });

        assert_eq!(running_max.get(), 5);
        source.set(2);
        assert_eq!(running_max.get(), 5);
        source.set(9);
        assert_eq!(running_max.get(), 9);
    }

    #[test]
    fn memo_clone_shares_state() {
        let memo1 = Memo::new(|| 42);
        let memo2 = memo1.clone();

        memo1.get();
        assert!(memo2.has_value());
        assert_eq!(memo1.id(), memo2.id());
    }

    #[test]
    fn dropped_memo_leaves_graph() {
        let before = Runtime::node_count();
        {
            let memo = Memo::new(|| 1);
            memo.get();
            assert_eq!(Runtime::node_count(), before + 1);
        }
        assert_eq!(Runtime::node_count(), before);
    }
}
