//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created with [`Effect::new`], the effect runs its function
//!    immediately to establish initial dependencies. [`Effect::new_lazy`]
//!    defers the first run to the next flush instead.
//!
//! 2. When any dependency changes, the effect is queued and re-runs on the
//!    next [`Runtime::flush`].
//!
//! 3. Every run replaces the effect's dependency set with the reads made
//!    during that run.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::warn;

use super::runtime::{Reactive, Runtime};
use crate::graph::{NodeId, NodeKind};

type EffectFn = Box<dyn FnMut()>;

/// A side-effecting computation that runs when dependencies change.
///
/// The effect lives as long as a handle to it does; dropping the last
/// handle disposes it.
///
/// # Example
///
/// ```rust
/// use fluentform_core::reactive::{Effect, Runtime, Signal};
///
/// let count = Signal::new(0);
/// let c = count.clone();
/// let effect = Effect::new(move || {
///     let _ = c.get();
/// });
///
/// count.set(5);
/// Runtime::flush();
/// assert_eq!(effect.run_count(), 2);
/// ```
pub struct Effect {
    inner: Rc<EffectInner>,
}

struct EffectInner {
    id: NodeId,
    run: RefCell<Option<EffectFn>>,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

impl Effect {
    /// Create a new effect that runs immediately.
    pub fn new(run: impl FnMut() + 'static) -> Self {
        let effect = Self::create(Box::new(run));
        Runtime::update_if_necessary(effect.inner.id);
        effect
    }

    /// Create a new effect whose first run happens on the next flush.
    pub fn new_lazy(run: impl FnMut() + 'static) -> Self {
        let effect = Self::create(Box::new(run));
        Runtime::schedule(effect.inner.id);
        effect
    }

    fn create(run: EffectFn) -> Self {
        let inner = Rc::new(EffectInner {
            id: Runtime::create_node(NodeKind::Effect),
            run: RefCell::new(Some(run)),
            disposed: Cell::new(false),
            run_count: Cell::new(0),
        });
        let weak: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        Runtime::register(inner.id, weak);
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Run the effect now, regardless of its dirty state.
    pub fn execute(&self) {
        self.inner.run();
    }

    /// Queue the effect for the next flush.
    pub fn schedule(&self) {
        if !self.inner.disposed.get() {
            Runtime::schedule(self.inner.id);
        }
    }

    /// Dispose of the effect. It will not run again.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Get the number of times this effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of nodes read by the last run.
    pub fn dependency_count(&self) -> usize {
        Runtime::dependency_count(self.inner.id)
    }
}

impl EffectInner {
    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        Runtime::remove_node(self.id);
        // Still borrowed when an effect disposes itself; `run` drops the
        // closure once it returns.
        let closure = self.run.try_borrow_mut().ok().and_then(|mut slot| slot.take());
        drop(closure);
    }
}

impl Reactive for EffectInner {
    fn run(&self) -> bool {
        if self.disposed.get() {
            return false;
        }
        let Ok(mut slot) = self.run.try_borrow_mut() else {
            warn!(effect = self.id.raw(), "effect re-entered itself, skipping");
            return false;
        };
        let Some(run) = slot.as_mut() else {
            return false;
        };
        self.run_count.set(self.run_count.get() + 1);
        Runtime::run_tracked(self.id, run);

        if self.disposed.get() {
            let closure = slot.take();
            drop(slot);
            drop(closure);
        }
        false
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        Runtime::remove_node(self.id);
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
