//! Dependency tracker
//!
//! Lazily materializes one reactive cell per field of a group, plus a cell
//! holding the group's live key list. A field cell is created on first
//! request and observes that control instance until the owning scope is
//! disposed, even if the field is later removed from the group.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::trace;

use crate::forms::{AbstractControl, ControlEvent, ControlId, FormGroup, WeakControl};
use crate::reactive::{to_cell, CellOptions, Debouncer, Memo, Observable, ReadSignal, Scope};

/// Decides whether a field emission reaches its cell.
pub type FieldFilter = Rc<dyn Fn(&AbstractControl) -> bool>;

/// Called with the field name on every tracked field read.
pub type TrackHandler = Rc<dyn Fn(&str)>;

#[derive(Clone, Default)]
pub struct TrackerOptions {
    /// Coalesce emissions arriving within this window.
    pub debounce: Option<Duration>,
    /// Shared window; takes precedence over `debounce`.
    pub debouncer: Option<Debouncer>,
    pub filter: Option<FieldFilter>,
    pub on_track: Option<TrackHandler>,
}

impl TrackerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }

    pub fn debouncer(mut self, debouncer: &Debouncer) -> Self {
        self.debouncer = Some(debouncer.clone());
        self
    }

    pub fn filter(mut self, filter: impl Fn(&AbstractControl) -> bool + 'static) -> Self {
        self.filter = Some(Rc::new(filter));
        self
    }

    /// Only forward emissions of controls that are dirty.
    pub fn dirty_only(self) -> Self {
        self.filter(AbstractControl::dirty)
    }

    pub fn on_track(mut self, handler: impl Fn(&str) + 'static) -> Self {
        self.on_track = Some(Rc::new(handler));
        self
    }

    fn apply_debounce<T: Clone + 'static>(&self, stream: Observable<T>) -> Observable<T> {
        match (&self.debouncer, self.debounce) {
            (Some(debouncer), _) => stream.debounce_with(debouncer),
            (None, Some(window)) => stream.debounce(window),
            (None, None) => stream,
        }
    }
}

impl fmt::Debug for TrackerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerOptions")
            .field("debounce", &self.debounce)
            .field("debouncer", &self.debouncer)
            .field("filter", &self.filter.is_some())
            .field("on_track", &self.on_track.is_some())
            .finish()
    }
}

/// Per-group cache of field cells.
#[derive(Clone)]
pub struct DependencyTracker {
    inner: Rc<TrackerInner>,
}

struct TrackerInner {
    group: FormGroup,
    scope: Scope,
    options: TrackerOptions,
    cells: RefCell<IndexMap<String, ReadSignal<Value>>>,
    entries: OnceCell<ReadSignal<Vec<(String, ControlId)>>>,
    field_set: OnceCell<ReadSignal<Vec<String>>>,
}

fn snapshot_entries(group: &AbstractControl) -> Vec<(String, ControlId)> {
    group
        .named_children()
        .into_iter()
        .map(|(name, control)| (name, control.id()))
        .collect()
}

impl DependencyTracker {
    /// Subscriptions made by the tracker are torn down with `scope`.
    pub fn new(group: &FormGroup, scope: &Scope, options: TrackerOptions) -> Self {
        Self {
            inner: Rc::new(TrackerInner {
                group: group.clone(),
                scope: scope.clone(),
                options,
                cells: RefCell::new(IndexMap::new()),
                entries: OnceCell::new(),
                field_set: OnceCell::new(),
            }),
        }
    }

    pub fn group(&self) -> &FormGroup {
        &self.inner.group
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.inner.options
    }

    /// The cell for `name`, created on first call.
    ///
    /// Returns the cached cell for a field that has since been removed, and
    /// `None` for a field that never had a cell and is not in the group.
    pub fn get_or_create_cell(&self, name: &str) -> Option<ReadSignal<Value>> {
        if let Some(cell) = self.get_cell(name) {
            return Some(cell);
        }
        let control = self.inner.group.get_control(name)?;
        let cell = self.create_cell(&control);
        trace!(group = self.inner.group.id().raw(), field = name, "field cell created");
        self.inner
            .cells
            .borrow_mut()
            .insert(name.to_string(), cell.clone());
        Some(cell)
    }

    fn create_cell(&self, control: &AbstractControl) -> ReadSignal<Value> {
        let options = &self.inner.options;
        let mut stream = control.value_changes();
        if let Some(filter) = options.filter.clone() {
            let weak: WeakControl = control.downgrade();
            stream = stream.filter(move |_| weak.upgrade().is_some_and(|c| filter(&c)));
        }
        let stream = options.apply_debounce(stream);
        to_cell(
            &stream,
            control.value(),
            CellOptions::new().with_scope(&self.inner.scope),
        )
    }

    pub fn has_cell(&self, name: &str) -> bool {
        self.inner.cells.borrow().contains_key(name)
    }

    /// Lookup without creating.
    pub fn get_cell(&self, name: &str) -> Option<ReadSignal<Value>> {
        self.inner.cells.borrow().get(name).cloned()
    }

    /// Register a dependency on `name` without using its value.
    pub fn evaluate_cell(&self, name: &str) {
        if let Some(cell) = self.get_or_create_cell(name) {
            cell.get();
        }
    }

    /// Names of the fields that have a cell, in creation order.
    pub fn tracked_fields(&self) -> Vec<String> {
        self.inner.cells.borrow().keys().cloned().collect()
    }

    /// Live `(name, control id)` list of the group. Changes whenever a child
    /// is added, removed or replaced.
    pub fn control_entries(&self) -> ReadSignal<Vec<(String, ControlId)>> {
        self.inner
            .entries
            .get_or_init(|| {
                let weak = self.inner.group.downgrade();
                let stream = self
                    .inner
                    .group
                    .events()
                    .filter(|event| matches!(event, ControlEvent::ControlsChanged))
                    .filter_map(move |_| weak.upgrade().map(|group| snapshot_entries(&group)));
                let stream = self.inner.options.apply_debounce(stream);
                to_cell(
                    &stream,
                    snapshot_entries(&self.inner.group),
                    CellOptions::new().with_scope(&self.inner.scope),
                )
            })
            .clone()
    }

    /// Live, ordered list of field names.
    pub fn field_set_cell(&self) -> ReadSignal<Vec<String>> {
        self.inner
            .field_set
            .get_or_init(|| {
                let entries = self.control_entries();
                Memo::new(move || {
                    let mut names: Vec<String> = Vec::new();
                    for (name, _) in entries.get() {
                        if !names.contains(&name) {
                            names.push(name);
                        }
                    }
                    names
                })
                .read_only()
            })
            .clone()
    }

    pub(crate) fn notify_track(&self, name: &str) {
        if let Some(handler) = &self.inner.options.on_track {
            handler(name);
        }
    }
}

impl fmt::Debug for DependencyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyTracker")
            .field("group", &self.inner.group.id())
            .field("cells", &self.tracked_fields())
            .finish()
    }
}
