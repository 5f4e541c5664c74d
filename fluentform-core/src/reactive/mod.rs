//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and effects,
//! plus the plumbing the forms engine needs around them: disposal scopes,
//! push streams and the adapter turning a stream into a cell.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the signal automatically
//! registers that context as a dependent. When the signal's value changes, all
//! dependents are notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects run when the runtime is flushed, never in the middle of a
//! write.
//!
//! ## Scopes
//!
//! A Scope owns teardown work. Everything an extended form group creates is
//! registered on its scope and released together.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, register the dependency.

mod adapter;
mod context;
mod effect;
mod memo;
mod runtime;
mod scope;
mod signal;
mod stream;

pub use adapter::{
    to_cell, to_cell_lazy, to_cell_lazy_shared, to_cell_optional, to_cell_sync, CellOptions,
    LazyCell,
};
pub use context::{untracked, ReactiveContext};
pub use effect::Effect;
pub use memo::Memo;
pub use runtime::{Runtime, TimerId};
pub use scope::Scope;
pub use signal::{EqualFn, ReadSignal, Signal};
pub use stream::{Debouncer, Observable, Observer, Subject, Subscription};
