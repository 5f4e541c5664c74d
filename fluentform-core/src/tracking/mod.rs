//! Field-level dependency tracking
//!
//! [`DependencyTracker`] owns the per-field cells of one group and
//! [`ValueProxy`] reads through them, so reactive computations depend on
//! the fields they actually read and on nothing else.

mod proxy;
mod tracker;

pub use proxy::ValueProxy;
pub use tracker::{DependencyTracker, FieldFilter, TrackHandler, TrackerOptions};
