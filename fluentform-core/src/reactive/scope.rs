//! Disposal Scopes
//!
//! A [`Scope`] owns teardown work: effects, stream subscriptions and
//! arbitrary cleanup callbacks. Scopes form a tree. Disposing a scope
//! disposes its children first, then runs its own callbacks in reverse
//! registration order.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::effect::Effect;
use super::stream::Subscription;

type Cleanup = Box<dyn FnOnce()>;

/// An owning disposal scope.
///
/// Cloning a scope yields another handle to the same node of the tree.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

struct ScopeInner {
    cleanups: RefCell<Vec<Cleanup>>,
    children: RefCell<Vec<Rc<ScopeInner>>>,
    parent: RefCell<Weak<ScopeInner>>,
    disposed: Cell<bool>,
}

impl Scope {
    /// Create a root scope.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                cleanups: RefCell::new(Vec::new()),
                children: RefCell::new(Vec::new()),
                parent: RefCell::new(Weak::new()),
                disposed: Cell::new(false),
            }),
        }
    }

    /// Create a child scope, disposed together with this one.
    ///
    /// A child of a disposed scope starts out disposed.
    pub fn child(&self) -> Scope {
        let child = Scope::new();
        if self.inner.disposed.get() {
            child.inner.disposed.set(true);
            return child;
        }
        *child.inner.parent.borrow_mut() = Rc::downgrade(&self.inner);
        self.inner.children.borrow_mut().push(child.inner.clone());
        child
    }

    /// Register a teardown callback. Runs immediately if the scope is
    /// already disposed.
    pub fn on_dispose(&self, cleanup: impl FnOnce() + 'static) {
        if self.inner.disposed.get() {
            cleanup();
            return;
        }
        self.inner.cleanups.borrow_mut().push(Box::new(cleanup));
    }

    /// Keep `effect` alive until the scope is disposed, then dispose it.
    pub fn add_effect(&self, effect: Effect) {
        self.on_dispose(move || effect.dispose());
    }

    /// Keep `subscription` alive until the scope is disposed.
    pub fn add_subscription(&self, subscription: Subscription) {
        self.on_dispose(move || subscription.unsubscribe());
    }

    /// Dispose the scope and every child scope. Idempotent.
    pub fn dispose(&self) {
        if let Some(parent) = self.inner.parent.borrow().upgrade() {
            parent
                .children
                .borrow_mut()
                .retain(|c| !Rc::ptr_eq(c, &self.inner));
        }
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Number of callbacks waiting for disposal.
    pub fn cleanup_count(&self) -> usize {
        self.inner.cleanups.borrow().len()
    }
}

impl ScopeInner {
    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let children = std::mem::take(&mut *self.children.borrow_mut());
        for child in children {
            child.dispose();
        }
        // Callbacks may register more teardown on this scope; those run
        // immediately because the scope is already flagged disposed.
        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("disposed", &self.is_disposed())
            .field("cleanups", &self.cleanup_count())
            .field("children", &self.inner.children.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Runtime, Signal};

    #[test]
    fn cleanups_run_in_reverse_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let scope = Scope::new();
        for i in 0..3 {
            let l = log.clone();
            scope.on_dispose(move || l.borrow_mut().push(i));
        }

        scope.dispose();
        assert_eq!(*log.borrow(), vec![2, 1, 0]);

        scope.dispose();
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn children_dispose_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let parent = Scope::new();
        let child = parent.child();

        let l = log.clone();
        parent.on_dispose(move || l.borrow_mut().push("parent"));
        let l = log.clone();
        child.on_dispose(move || l.borrow_mut().push("child"));

        parent.dispose();
        assert!(child.is_disposed());
        assert_eq!(*log.borrow(), vec!["child", "parent"]);
    }

    #[test]
    fn disposing_child_detaches_it() {
        let parent = Scope::new();
        let child = parent.child();
        child.dispose();
        assert!(!parent.is_disposed());
        assert_eq!(parent.inner.children.borrow().len(), 0);
    }

    #[test]
    fn late_cleanup_runs_immediately() {
        let scope = Scope::new();
        scope.dispose();

        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        scope.on_dispose(move || r.set(true));
        assert!(ran.get());
        assert!(scope.child().is_disposed());
    }

    #[test]
    fn scope_disposes_effects() {
        let signal = Signal::new(0);
        let scope = Scope::new();
        let s = signal.clone();
        let effect = Effect::new(move || {
            s.get();
        });
        scope.add_effect(effect.clone());

        scope.dispose();
        signal.set(1);
        Runtime::flush();
        assert!(effect.is_disposed());
        assert_eq!(effect.run_count(), 1);
    }
}
