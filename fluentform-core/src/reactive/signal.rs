//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    read is recorded as a dependency of that context.
//!
//! 2. When a signal's value changes, the runtime marks every dependent dirty
//!    and queues the affected effects.
//!
//! 3. Writes that compare equal to the current value (by the signal's
//!    equality function) are dropped and notify nobody.
//!
//! [`ReadSignal`] is the read-only, type-erased view shared by signals,
//! memos and stream-backed cells.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use super::context::ReactiveContext;
use super::memo::Memo;
use super::runtime::Runtime;
use crate::graph::{NodeId, NodeKind};

/// Equality used to suppress redundant notifications.
pub type EqualFn<T> = Rc<dyn Fn(&T, &T) -> bool>;

pub(crate) fn default_equal<T: PartialEq + 'static>() -> EqualFn<T> {
    Rc::new(|a: &T, b: &T| a == b)
}

/// Anything that can be read as a reactive cell.
pub(crate) trait CellSource<T> {
    fn node_id(&self) -> NodeId;

    /// Read and register a dependency of the running computation.
    fn read(&self) -> T;

    /// Read without registering a dependency.
    fn read_untracked(&self) -> T;
}

/// A reactive signal holding a value of type T.
///
/// Cloning a signal yields another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use fluentform_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

struct SignalInner<T> {
    id: NodeId,
    value: RefCell<T>,
    equal: EqualFn<T>,
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, default_equal())
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Create a signal with a custom equality function.
    pub fn with_equality(value: T, equal: EqualFn<T>) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                id: Runtime::create_node(NodeKind::Source),
                value: RefCell::new(value),
                equal,
            }),
        }
    }

    /// Get the signal's graph node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, registering a dependency of the running
    /// computation.
    pub fn get(&self) -> T {
        self.inner.read()
    }

    /// Borrow the current value, registering a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        ReactiveContext::track_dependency(self.inner.id);
        f(&self.inner.value.borrow())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.read_untracked()
    }

    /// Set a new value and notify dependents.
    ///
    /// Returns false when the value compared equal and nothing happened.
    pub fn set(&self, value: T) -> bool {
        let unchanged = (self.inner.equal)(&self.inner.value.borrow(), &value);
        if unchanged {
            return false;
        }
        let previous = self.inner.value.replace(value);
        drop(previous);
        Runtime::notify_changed(self.inner.id);
        true
    }

    /// Update the value using a function of the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = f(&self.inner.value.borrow());
        self.set(next)
    }

    /// A read-only view of this signal.
    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal {
            source: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> CellSource<T> for SignalInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn read(&self) -> T {
        ReactiveContext::track_dependency(self.id);
        self.value.borrow().clone()
    }

    fn read_untracked(&self) -> T {
        self.value.borrow().clone()
    }
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        Runtime::remove_node(self.id);
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .finish()
    }
}

/// Read-only handle to a reactive cell: a signal, a memo or a cell fed by a
/// push stream.
pub struct ReadSignal<T: 'static> {
    source: Rc<dyn CellSource<T>>,
}

impl<T: Clone + 'static> ReadSignal<T> {
    pub(crate) fn from_source(source: Rc<dyn CellSource<T>>) -> Self {
        Self { source }
    }

    /// A cell that never changes.
    pub fn constant(value: T) -> Self
    where
        T: PartialEq,
    {
        Signal::new(value).read_only()
    }

    pub fn id(&self) -> NodeId {
        self.source.node_id()
    }

    /// Get the current value, registering a dependency.
    pub fn get(&self) -> T {
        self.source.read()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.source.read_untracked()
    }

    /// Derive a memoized cell from this one.
    pub fn map<U>(&self, f: impl Fn(T) -> U + 'static) -> ReadSignal<U>
    where
        U: Clone + PartialEq + 'static,
    {
        let source = self.clone();
        Memo::new(move || f(source.get())).read_only()
    }
}

impl<T: 'static> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
        }
    }
}

impl<T: Clone + 'static> From<Signal<T>> for ReadSignal<T> {
    fn from(signal: Signal<T>) -> Self {
        signal.read_only()
    }
}

impl<T: Clone + 'static> From<&Signal<T>> for ReadSignal<T> {
    fn from(signal: &Signal<T>) -> Self {
        signal.read_only()
    }
}

impl<T: Clone + Debug + 'static> Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSignal")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .finish()
    }
}
