//! Control tree
//!
//! [`AbstractControl`] is a shared handle to one node of a form: a leaf
//! control, a group of named children or an array of children. All three
//! share one core so that validation, status, dirty/touched bookkeeping
//! and event streams behave the same everywhere.
//!
//! # Values
//!
//! A leaf stores its value. A group's value is the object of its enabled
//! children, or of all children when every child is disabled. An array's
//! value follows the same rule over its elements.
//!
//! # Status
//!
//! `update_value_and_validity` recomputes the status bottom-up: a control
//! with own errors is invalid, a control waiting on async validators is
//! pending, otherwise the children decide. Changes bubble to the parent
//! unless `only_self` is set.
//!
//! None of the methods hold a borrow of the core while calling out to
//! validators or stream observers, so both may freely read the tree.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{join_all, LocalBoxFuture};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use tracing::trace;

use super::validators::{merge_errors, AsyncValidatorFn, ValidationErrors, ValidatorFn};
use crate::reactive::{Observable, Subject};

static CONTROL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of a control instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlId(u64);

impl ControlId {
    fn next() -> Self {
        Self(CONTROL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlStatus {
    Valid,
    Invalid,
    Pending,
    Disabled,
}

impl ControlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlStatus::Valid => "VALID",
            ControlStatus::Invalid => "INVALID",
            ControlStatus::Pending => "PENDING",
            ControlStatus::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When user input reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOn {
    #[default]
    Change,
    Blur,
    Submit,
}

/// Unified control event stream item.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Value(Value),
    Status(ControlStatus),
    Pristine(bool),
    Touched(bool),
    /// A child was added, removed or replaced.
    ControlsChanged,
    Reset,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Do not propagate to the parent.
    pub only_self: bool,
    /// Emit on the value, status and event streams.
    pub emit_event: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            only_self: false,
            emit_event: true,
        }
    }
}

impl UpdateOptions {
    pub fn only_self() -> Self {
        Self {
            only_self: true,
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            emit_event: false,
            ..Self::default()
        }
    }

    fn for_child(self) -> Self {
        Self {
            only_self: true,
            ..self
        }
    }
}

/// Construction options for a control.
#[derive(Debug, Clone, Default)]
pub struct ControlOptions {
    pub validators: Vec<ValidatorFn>,
    pub async_validators: Vec<AsyncValidatorFn>,
    pub update_on: Option<UpdateOn>,
    /// Reset returns to the initial value instead of `null`.
    pub non_nullable: bool,
    pub disabled: bool,
}

impl ControlOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validator(mut self, validator: ValidatorFn) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn validators(mut self, validators: impl IntoIterator<Item = ValidatorFn>) -> Self {
        self.validators.extend(validators);
        self
    }

    pub fn async_validator(mut self, validator: AsyncValidatorFn) -> Self {
        self.async_validators.push(validator);
        self
    }

    pub fn update_on(mut self, update_on: UpdateOn) -> Self {
        self.update_on = Some(update_on);
        self
    }

    pub fn non_nullable(mut self) -> Self {
        self.non_nullable = true;
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Control,
    Group,
    Array,
}

enum Children {
    Leaf,
    Group(IndexMap<String, AbstractControl>),
    Array(Vec<AbstractControl>),
}

struct ControlCore {
    id: ControlId,
    value: RefCell<Value>,
    default_value: RefCell<Value>,
    update_on: Cell<Option<UpdateOn>>,
    status: Cell<ControlStatus>,
    errors: RefCell<Option<ValidationErrors>>,
    pristine: Cell<bool>,
    touched: Cell<bool>,
    submitted: Cell<bool>,
    validators: RefCell<SmallVec<[ValidatorFn; 2]>>,
    async_validators: RefCell<SmallVec<[AsyncValidatorFn; 2]>>,
    async_generation: Cell<u64>,
    async_pending: Cell<bool>,
    pending_value: RefCell<Option<Value>>,
    pending_dirty: Cell<bool>,
    pending_touched: Cell<bool>,
    parent: RefCell<Weak<ControlCore>>,
    children: RefCell<Children>,
    value_changes: Subject<Value>,
    status_changes: Subject<ControlStatus>,
    events: Subject<ControlEvent>,
}

/// Shared handle to a control of any kind.
#[derive(Clone)]
pub struct AbstractControl {
    core: Rc<ControlCore>,
}

/// Non-owning handle to a control.
#[derive(Clone)]
pub struct WeakControl(Weak<ControlCore>);

impl WeakControl {
    pub fn upgrade(&self) -> Option<AbstractControl> {
        self.0.upgrade().map(|core| AbstractControl { core })
    }
}

impl fmt::Debug for WeakControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(control) => write!(f, "WeakControl({:?})", control.id()),
            None => f.write_str("WeakControl(<dropped>)"),
        }
    }
}

impl AbstractControl {
    fn create(value: Value, children: Children, options: &ControlOptions) -> Self {
        let default_value = if options.non_nullable {
            value.clone()
        } else {
            Value::Null
        };
        let control = Self {
            core: Rc::new(ControlCore {
                id: ControlId::next(),
                value: RefCell::new(value),
                default_value: RefCell::new(default_value),
                update_on: Cell::new(options.update_on),
                status: Cell::new(ControlStatus::Valid),
                errors: RefCell::new(None),
                pristine: Cell::new(true),
                touched: Cell::new(false),
                submitted: Cell::new(false),
                validators: RefCell::new(options.validators.iter().cloned().collect()),
                async_validators: RefCell::new(options.async_validators.iter().cloned().collect()),
                async_generation: Cell::new(0),
                async_pending: Cell::new(false),
                pending_value: RefCell::new(None),
                pending_dirty: Cell::new(false),
                pending_touched: Cell::new(false),
                parent: RefCell::new(Weak::new()),
                children: RefCell::new(children),
                value_changes: Subject::new(),
                status_changes: Subject::new(),
                events: Subject::new(),
            }),
        };
        for child in control.children() {
            child.set_parent(Some(&control));
        }
        if options.disabled {
            control.core.status.set(ControlStatus::Disabled);
            for child in control.children() {
                child.disable_with(UpdateOptions::silent().for_child());
            }
        } else {
            control.update_value_and_validity(UpdateOptions::silent().for_child());
        }
        control
    }

    pub(crate) fn leaf(value: Value, options: &ControlOptions) -> Self {
        Self::create(value, Children::Leaf, options)
    }

    pub(crate) fn group(controls: IndexMap<String, AbstractControl>, options: &ControlOptions) -> Self {
        Self::create(Value::Null, Children::Group(controls), options)
    }

    pub(crate) fn array(controls: Vec<AbstractControl>, options: &ControlOptions) -> Self {
        Self::create(Value::Null, Children::Array(controls), options)
    }

    pub fn id(&self) -> ControlId {
        self.core.id
    }

    pub fn kind(&self) -> ControlKind {
        match &*self.core.children.borrow() {
            Children::Leaf => ControlKind::Control,
            Children::Group(_) => ControlKind::Group,
            Children::Array(_) => ControlKind::Array,
        }
    }

    pub fn ptr_eq(&self, other: &AbstractControl) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    pub fn downgrade(&self) -> WeakControl {
        WeakControl(Rc::downgrade(&self.core))
    }

    pub fn parent(&self) -> Option<AbstractControl> {
        self.core
            .parent
            .borrow()
            .upgrade()
            .map(|core| AbstractControl { core })
    }

    pub fn root(&self) -> AbstractControl {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    fn set_parent(&self, parent: Option<&AbstractControl>) {
        *self.core.parent.borrow_mut() = parent.map_or_else(Weak::new, |p| Rc::downgrade(&p.core));
    }

    /// Direct children in order. Empty for a leaf.
    pub fn children(&self) -> Vec<AbstractControl> {
        match &*self.core.children.borrow() {
            Children::Leaf => Vec::new(),
            Children::Group(controls) => controls.values().cloned().collect(),
            Children::Array(controls) => controls.clone(),
        }
    }

    /// Direct children of a group with their names.
    pub fn named_children(&self) -> Vec<(String, AbstractControl)> {
        match &*self.core.children.borrow() {
            Children::Group(controls) => controls
                .iter()
                .map(|(name, c)| (name.clone(), c.clone()))
                .collect(),
            Children::Array(controls) => controls
                .iter()
                .enumerate()
                .map(|(i, c)| (i.to_string(), c.clone()))
                .collect(),
            Children::Leaf => Vec::new(),
        }
    }

    // ---- value ----------------------------------------------------------

    /// The live value.
    pub fn value(&self) -> Value {
        self.reduce_value(false)
    }

    /// The value including disabled children.
    pub fn raw_value(&self) -> Value {
        self.reduce_value(true)
    }

    fn reduce_value(&self, raw: bool) -> Value {
        let include_all = raw || self.disabled();
        match &*self.core.children.borrow() {
            Children::Leaf => self.core.value.borrow().clone(),
            Children::Group(controls) => {
                let mut map = Map::new();
                for (name, control) in controls {
                    if include_all || control.enabled() {
                        map.insert(name.clone(), control.reduce_value(raw));
                    }
                }
                Value::Object(map)
            }
            Children::Array(controls) => Value::Array(
                controls
                    .iter()
                    .filter(|c| include_all || c.enabled())
                    .map(|c| c.reduce_value(raw))
                    .collect(),
            ),
        }
    }

    pub fn default_value(&self) -> Value {
        self.core.default_value.borrow().clone()
    }

    /// Replace the whole value. Group and array children missing from
    /// `value` keep their current value.
    pub fn set_value(&self, value: Value) {
        self.set_value_with(value, UpdateOptions::default());
    }

    pub fn set_value_with(&self, value: Value, options: UpdateOptions) {
        self.write_value(&value, options, false);
        self.update_value_and_validity(options);
    }

    /// Set the given keys (or indices) only.
    pub fn patch_value(&self, value: Value) {
        self.patch_value_with(value, UpdateOptions::default());
    }

    pub fn patch_value_with(&self, value: Value, options: UpdateOptions) {
        self.write_value(&value, options, true);
        self.update_value_and_validity(options);
    }

    fn write_value(&self, value: &Value, options: UpdateOptions, patch: bool) {
        let child_options = options.for_child();
        match self.kind() {
            ControlKind::Control => {
                *self.core.value.borrow_mut() = value.clone();
                self.core.pending_value.borrow_mut().take();
            }
            ControlKind::Group => {
                for (name, child) in self.named_children() {
                    if let Some(v) = value.get(&name) {
                        child.write_value(v, child_options, patch);
                        child.update_value_and_validity(child_options);
                    }
                }
            }
            ControlKind::Array => {
                for (index, child) in self.children().into_iter().enumerate() {
                    if let Some(v) = value.get(index) {
                        child.write_value(v, child_options, patch);
                        child.update_value_and_validity(child_options);
                    }
                }
            }
        }
    }

    /// Reset to default values, pristine and untouched.
    pub fn reset(&self) {
        self.reset_inner(None, UpdateOptions::default());
    }

    /// Reset to `value`. For groups, children missing from `value` reset to
    /// their defaults; a `null` value resets every child to `null`.
    pub fn reset_to(&self, value: Value) {
        self.reset_inner(Some(&value), UpdateOptions::default());
    }

    pub fn reset_to_with(&self, value: Value, options: UpdateOptions) {
        self.reset_inner(Some(&value), options);
    }

    fn reset_inner(&self, value: Option<&Value>, options: UpdateOptions) {
        let child_options = options.for_child();
        match self.kind() {
            ControlKind::Control => {
                let next = value.cloned().unwrap_or_else(|| self.default_value());
                self.mark_pristine_inner(options);
                self.mark_untouched_inner(options);
                *self.core.value.borrow_mut() = next;
                self.core.pending_value.borrow_mut().take();
            }
            kind => {
                let null = Value::Null;
                for (name, child) in self.named_children() {
                    let child_value = match value {
                        None => None,
                        Some(Value::Null) => Some(&null),
                        Some(v) if kind == ControlKind::Array => {
                            name.parse::<usize>().ok().and_then(|i| v.get(i))
                        }
                        Some(v) => v.get(&name),
                    };
                    child.reset_inner(child_value, child_options);
                }
                self.update_pristine(options);
                self.update_touched(options);
            }
        }
        self.update_value_and_validity(options);
        if options.emit_event {
            self.core.events.emit(ControlEvent::Reset);
        }
    }

    // ---- validity -------------------------------------------------------

    pub fn status(&self) -> ControlStatus {
        self.core.status.get()
    }

    pub fn valid(&self) -> bool {
        self.status() == ControlStatus::Valid
    }

    pub fn invalid(&self) -> bool {
        self.status() == ControlStatus::Invalid
    }

    pub fn pending(&self) -> bool {
        self.status() == ControlStatus::Pending
    }

    pub fn disabled(&self) -> bool {
        self.status() == ControlStatus::Disabled
    }

    pub fn enabled(&self) -> bool {
        !self.disabled()
    }

    /// Own errors (children excluded).
    pub fn errors(&self) -> Option<ValidationErrors> {
        self.core.errors.borrow().clone()
    }

    pub fn has_error(&self, key: &str) -> bool {
        self.core
            .errors
            .borrow()
            .as_ref()
            .is_some_and(|errors| errors.contains_key(key))
    }

    pub fn get_error(&self, key: &str) -> Option<Value> {
        self.core
            .errors
            .borrow()
            .as_ref()
            .and_then(|errors| errors.get(key).cloned())
    }

    fn all_controls_disabled(&self) -> bool {
        let children = self.children();
        if self.kind() == ControlKind::Control || children.is_empty() {
            return self.disabled();
        }
        children.iter().all(AbstractControl::disabled)
    }

    fn any_child_has_status(&self, status: ControlStatus) -> bool {
        self.children().iter().any(|c| c.status() == status)
    }

    fn calculate_status(&self) -> ControlStatus {
        if self.all_controls_disabled() {
            ControlStatus::Disabled
        } else if self.core.errors.borrow().is_some() {
            ControlStatus::Invalid
        } else if self.core.async_pending.get() || self.any_child_has_status(ControlStatus::Pending)
        {
            ControlStatus::Pending
        } else if self.any_child_has_status(ControlStatus::Invalid) {
            ControlStatus::Invalid
        } else {
            ControlStatus::Valid
        }
    }

    fn run_validators(&self) -> Option<ValidationErrors> {
        let validators: SmallVec<[ValidatorFn; 2]> = self.core.validators.borrow().clone();
        validators
            .iter()
            .fold(None, |acc, v| merge_errors(acc, v.validate(self)))
    }

    /// Recompute errors and status, emit, and bubble to the parent.
    pub fn update_value_and_validity(&self, options: UpdateOptions) {
        let initial = if self.all_controls_disabled() {
            ControlStatus::Disabled
        } else {
            ControlStatus::Valid
        };
        self.core.status.set(initial);

        if self.enabled() {
            // Invalidate any async run still in flight.
            self.core
                .async_generation
                .set(self.core.async_generation.get() + 1);
            self.core.async_pending.set(false);

            let errors = self.run_validators();
            *self.core.errors.borrow_mut() = errors;
            let mut status = self.calculate_status();
            let has_async = !self.core.async_validators.borrow().is_empty();
            if has_async && matches!(status, ControlStatus::Valid | ControlStatus::Pending) {
                self.core.async_pending.set(true);
                status = ControlStatus::Pending;
            }
            self.core.status.set(status);
        } else {
            self.core.errors.borrow_mut().take();
        }

        if options.emit_event {
            self.emit_value_and_status();
        }
        if !options.only_self {
            if let Some(parent) = self.parent() {
                parent.update_value_and_validity(options);
            }
        }
    }

    fn emit_value_and_status(&self) {
        let value = self.value();
        let status = self.status();
        self.core.value_changes.emit(value.clone());
        self.core.status_changes.emit(status);
        self.core.events.emit(ControlEvent::Value(value));
        self.core.events.emit(ControlEvent::Status(status));
    }

    /// Replace own errors and recompute the status of this control and its
    /// ancestors without running validators.
    pub fn set_errors(&self, errors: Option<ValidationErrors>) {
        self.set_errors_with(errors, true);
    }

    pub fn set_errors_with(&self, errors: Option<ValidationErrors>, emit_event: bool) {
        *self.core.errors.borrow_mut() = errors;
        self.update_controls_errors(emit_event);
    }

    fn update_controls_errors(&self, emit_event: bool) {
        let status = self.calculate_status();
        self.core.status.set(status);
        if emit_event {
            self.core.status_changes.emit(status);
            self.core.events.emit(ControlEvent::Status(status));
        }
        if let Some(parent) = self.parent() {
            parent.update_controls_errors(emit_event);
        }
    }

    /// Run the async validators of every pending control in this subtree
    /// and apply their results. Results of runs made stale by a later
    /// `update_value_and_validity` are dropped.
    pub fn run_async_validation(&self) -> LocalBoxFuture<'static, ()> {
        let mut targets = Vec::new();
        self.collect_async_pending(&mut targets);
        let runs = targets.into_iter().map(|control| {
            let generation = control.core.async_generation.get();
            let validators: SmallVec<[AsyncValidatorFn; 2]> =
                control.core.async_validators.borrow().clone();
            let futures: Vec<_> = validators.iter().map(|v| v.validate(&control)).collect();
            async move {
                let results = join_all(futures).await;
                let errors = results.into_iter().fold(None, merge_errors);
                (control, generation, errors)
            }
        });
        let runs: Vec<_> = runs.collect();
        Box::pin(async move {
            for (control, generation, errors) in join_all(runs).await {
                if control.core.async_generation.get() != generation
                    || !control.core.async_pending.get()
                {
                    trace!(control = control.id().raw(), "dropping stale async result");
                    continue;
                }
                control.core.async_pending.set(false);
                control.set_errors(errors);
            }
        })
    }

    fn collect_async_pending(&self, out: &mut Vec<AbstractControl>) {
        for child in self.children() {
            child.collect_async_pending(out);
        }
        if self.core.async_pending.get() {
            out.push(self.clone());
        }
    }

    // ---- validator management -------------------------------------------

    pub fn validators(&self) -> Vec<ValidatorFn> {
        self.core.validators.borrow().to_vec()
    }

    /// Add validators not already present. Does not revalidate.
    pub fn add_validators(&self, validators: impl IntoIterator<Item = ValidatorFn>) {
        let mut current = self.core.validators.borrow_mut();
        for validator in validators {
            if !current.iter().any(|v| v.ptr_eq(&validator)) {
                current.push(validator);
            }
        }
    }

    pub fn remove_validators(&self, validators: &[ValidatorFn]) {
        self.core
            .validators
            .borrow_mut()
            .retain(|v| !validators.iter().any(|r| r.ptr_eq(v)));
    }

    pub fn set_validators(&self, validators: impl IntoIterator<Item = ValidatorFn>) {
        *self.core.validators.borrow_mut() = validators.into_iter().collect();
    }

    pub fn has_validator(&self, validator: &ValidatorFn) -> bool {
        self.core.validators.borrow().iter().any(|v| v.ptr_eq(validator))
    }

    pub fn clear_validators(&self) {
        self.core.validators.borrow_mut().clear();
    }

    pub fn async_validators(&self) -> Vec<AsyncValidatorFn> {
        self.core.async_validators.borrow().to_vec()
    }

    pub fn add_async_validators(&self, validators: impl IntoIterator<Item = AsyncValidatorFn>) {
        let mut current = self.core.async_validators.borrow_mut();
        for validator in validators {
            if !current.iter().any(|v| v.ptr_eq(&validator)) {
                current.push(validator);
            }
        }
    }

    pub fn remove_async_validators(&self, validators: &[AsyncValidatorFn]) {
        self.core
            .async_validators
            .borrow_mut()
            .retain(|v| !validators.iter().any(|r| r.ptr_eq(v)));
    }

    pub fn set_async_validators(&self, validators: impl IntoIterator<Item = AsyncValidatorFn>) {
        *self.core.async_validators.borrow_mut() = validators.into_iter().collect();
    }

    pub fn has_async_validator(&self, validator: &AsyncValidatorFn) -> bool {
        self.core
            .async_validators
            .borrow()
            .iter()
            .any(|v| v.ptr_eq(validator))
    }

    pub fn clear_async_validators(&self) {
        self.core.async_validators.borrow_mut().clear();
    }

    // ---- interaction state ----------------------------------------------

    pub fn pristine(&self) -> bool {
        self.core.pristine.get()
    }

    pub fn dirty(&self) -> bool {
        !self.pristine()
    }

    pub fn touched(&self) -> bool {
        self.core.touched.get()
    }

    pub fn untouched(&self) -> bool {
        !self.touched()
    }

    pub fn submitted(&self) -> bool {
        self.core.submitted.get()
    }

    /// Mark this control and its ancestors dirty.
    pub fn mark_as_dirty(&self) {
        let changed = self.core.pristine.replace(false);
        if let Some(parent) = self.parent() {
            parent.mark_as_dirty();
        }
        if changed {
            self.core.events.emit(ControlEvent::Pristine(false));
        }
    }

    /// Mark this control and its descendants pristine; ancestors recompute.
    pub fn mark_as_pristine(&self) {
        self.mark_pristine_inner(UpdateOptions::default());
    }

    fn mark_pristine_inner(&self, options: UpdateOptions) {
        let changed = !self.core.pristine.replace(true);
        for child in self.children() {
            child.mark_pristine_inner(options.for_child());
        }
        if !options.only_self {
            if let Some(parent) = self.parent() {
                parent.update_pristine(options);
            }
        }
        if changed && options.emit_event {
            self.core.events.emit(ControlEvent::Pristine(true));
        }
    }

    fn update_pristine(&self, options: UpdateOptions) {
        let pristine = !self.children().iter().any(AbstractControl::dirty);
        let changed = self.core.pristine.replace(pristine) != pristine;
        if changed && options.emit_event {
            self.core.events.emit(ControlEvent::Pristine(pristine));
        }
        if !options.only_self {
            if let Some(parent) = self.parent() {
                parent.update_pristine(options);
            }
        }
    }

    /// Mark this control and its ancestors touched.
    pub fn mark_as_touched(&self) {
        let changed = !self.core.touched.replace(true);
        if let Some(parent) = self.parent() {
            parent.mark_as_touched();
        }
        if changed {
            self.core.events.emit(ControlEvent::Touched(true));
        }
    }

    /// Mark this control and its descendants untouched.
    pub fn mark_as_untouched(&self) {
        self.mark_untouched_inner(UpdateOptions::default());
    }

    fn mark_untouched_inner(&self, options: UpdateOptions) {
        let changed = self.core.touched.replace(false);
        self.core.pending_touched.set(false);
        for child in self.children() {
            child.mark_untouched_inner(options.for_child());
        }
        if !options.only_self {
            if let Some(parent) = self.parent() {
                parent.update_touched(options);
            }
        }
        if changed && options.emit_event {
            self.core.events.emit(ControlEvent::Touched(false));
        }
    }

    fn update_touched(&self, options: UpdateOptions) {
        let touched = self.children().iter().any(AbstractControl::touched);
        let changed = self.core.touched.replace(touched) != touched;
        if changed && options.emit_event {
            self.core.events.emit(ControlEvent::Touched(touched));
        }
        if !options.only_self {
            if let Some(parent) = self.parent() {
                parent.update_touched(options);
            }
        }
    }

    pub fn enable(&self) {
        self.enable_with(UpdateOptions::default());
    }

    pub fn enable_with(&self, options: UpdateOptions) {
        let parent_dirty = self.parent_marked_dirty(options.only_self);
        self.core.status.set(ControlStatus::Valid);
        for child in self.children() {
            child.enable_with(options.for_child());
        }
        self.update_value_and_validity(UpdateOptions {
            only_self: true,
            emit_event: options.emit_event,
        });
        self.update_ancestors(options, parent_dirty);
    }

    pub fn disable(&self) {
        self.disable_with(UpdateOptions::default());
    }

    pub fn disable_with(&self, options: UpdateOptions) {
        let parent_dirty = self.parent_marked_dirty(options.only_self);
        self.core.status.set(ControlStatus::Disabled);
        self.core.errors.borrow_mut().take();
        self.core.async_pending.set(false);
        for child in self.children() {
            child.disable_with(options.for_child());
        }
        if options.emit_event {
            self.emit_value_and_status();
        }
        self.update_ancestors(options, parent_dirty);
    }

    fn parent_marked_dirty(&self, only_self: bool) -> bool {
        let parent_dirty = self.parent().is_some_and(|p| p.dirty());
        !only_self && parent_dirty && !self.parent().is_some_and(|p| p.any_child_dirty())
    }

    fn any_child_dirty(&self) -> bool {
        self.children().iter().any(AbstractControl::dirty)
    }

    fn update_ancestors(&self, options: UpdateOptions, skip_pristine_check: bool) {
        if options.only_self {
            return;
        }
        if let Some(parent) = self.parent() {
            parent.update_value_and_validity(options);
            if !skip_pristine_check {
                parent.update_pristine(options);
            }
            parent.update_touched(options);
        }
    }

    // ---- update timing --------------------------------------------------

    /// Own update timing, inherited from the parent when unset.
    pub fn update_on(&self) -> UpdateOn {
        match self.core.update_on.get() {
            Some(update_on) => update_on,
            None => self.parent().map_or(UpdateOn::Change, |p| p.update_on()),
        }
    }

    /// The timing set on this control itself, if any.
    pub fn own_update_on(&self) -> Option<UpdateOn> {
        self.core.update_on.get()
    }

    /// A value typed by the user. Reaches the model now, on blur or on
    /// submit depending on [`AbstractControl::update_on`].
    pub fn set_value_from_user(&self, value: Value) {
        if self.update_on() == UpdateOn::Change {
            self.mark_as_dirty();
            self.set_value(value);
            return;
        }
        *self.core.pending_value.borrow_mut() = Some(value);
        self.core.pending_dirty.set(true);
    }

    /// The user left the field.
    pub fn blur_from_user(&self) {
        match self.update_on() {
            UpdateOn::Submit => self.core.pending_touched.set(true),
            UpdateOn::Blur => {
                self.commit_pending();
                self.mark_as_touched();
            }
            UpdateOn::Change => self.mark_as_touched(),
        }
    }

    fn commit_pending(&self) -> bool {
        let pending = self.core.pending_value.borrow_mut().take();
        if self.core.pending_dirty.replace(false) {
            self.mark_as_dirty();
        }
        match pending {
            Some(value) => {
                self.set_value_with(value, UpdateOptions::only_self());
                true
            }
            None => false,
        }
    }

    /// Apply every pending submit-time change in this subtree and emit a
    /// submitted event.
    pub fn submit(&self) {
        self.sync_pending_controls();
        self.core.submitted.set(true);
        self.core.events.emit(ControlEvent::Submitted);
    }

    fn sync_pending_controls(&self) -> bool {
        if self.kind() == ControlKind::Control {
            if self.update_on() != UpdateOn::Submit {
                return false;
            }
            if self.core.pending_touched.replace(false) {
                self.mark_as_touched();
            }
            return self.commit_pending();
        }
        let mut updated = false;
        for child in self.children() {
            updated |= child.sync_pending_controls();
        }
        if updated {
            self.update_value_and_validity(UpdateOptions::only_self());
        }
        updated
    }

    // ---- navigation -----------------------------------------------------

    /// Find a descendant by dot path. Array elements are addressed by index.
    pub fn get(&self, path: &str) -> Option<AbstractControl> {
        if path.is_empty() {
            return None;
        }
        path.split('.')
            .try_fold(self.clone(), |control, segment| control.child(segment))
    }

    /// Direct child by name (groups) or index (arrays).
    pub fn child(&self, name: &str) -> Option<AbstractControl> {
        match &*self.core.children.borrow() {
            Children::Group(controls) => controls.get(name).cloned(),
            Children::Array(controls) => name.parse::<usize>().ok().and_then(|i| controls.get(i).cloned()),
            Children::Leaf => None,
        }
    }

    // ---- structure ------------------------------------------------------

    pub(crate) fn with_group_controls<R>(
        &self,
        f: impl FnOnce(&mut IndexMap<String, AbstractControl>) -> R,
    ) -> Option<R> {
        match &mut *self.core.children.borrow_mut() {
            Children::Group(controls) => Some(f(controls)),
            _ => None,
        }
    }

    pub(crate) fn with_array_controls<R>(
        &self,
        f: impl FnOnce(&mut Vec<AbstractControl>) -> R,
    ) -> Option<R> {
        match &mut *self.core.children.borrow_mut() {
            Children::Array(controls) => Some(f(controls)),
            _ => None,
        }
    }

    pub(crate) fn adopt(&self, child: &AbstractControl) {
        child.set_parent(Some(self));
    }

    pub(crate) fn orphan(child: &AbstractControl) {
        child.set_parent(None);
    }

    /// Revalidate after a structural change and announce it.
    pub(crate) fn structure_changed(&self, options: UpdateOptions) {
        self.update_value_and_validity(options);
        if options.emit_event {
            self.core.events.emit(ControlEvent::ControlsChanged);
        }
    }

    // ---- streams --------------------------------------------------------

    pub fn value_changes(&self) -> Observable<Value> {
        self.core.value_changes.as_observable()
    }

    pub fn status_changes(&self) -> Observable<ControlStatus> {
        self.core.status_changes.as_observable()
    }

    pub fn events(&self) -> Observable<ControlEvent> {
        self.core.events.as_observable()
    }
}

impl PartialEq for AbstractControl {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for AbstractControl {}

impl fmt::Debug for AbstractControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbstractControl")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("value", &self.value())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{FormControl, FormGroup, Validators};
    use serde_json::json;

    fn profile() -> FormGroup {
        FormGroup::new([
            ("name", FormControl::new(json!("Lara")).into()),
            (
                "address",
                FormGroup::new([("city", FormControl::new(json!("London")).into())]).into(),
            ),
        ])
    }

    #[test]
    fn group_value_skips_disabled_children() {
        let form = profile();
        assert_eq!(form.value(), json!({"name": "Lara", "address": {"city": "London"}}));

        form.get("name").unwrap().disable();
        assert_eq!(form.value(), json!({"address": {"city": "London"}}));
        assert_eq!(form.raw_value()["name"], json!("Lara"));

        form.get("address.city").unwrap().disable();
        assert!(form.disabled());
        assert_eq!(form.value(), json!({"name": "Lara", "address": {"city": "London"}}));
    }

    #[test]
    fn status_bubbles_from_children() {
        let name = FormControl::with_options(
            json!("x"),
            ControlOptions::new().validator(Validators::required()),
        );
        let form = FormGroup::new([("name", name.clone().into())]);
        assert!(form.valid());

        name.set_value(json!(""));
        assert!(name.invalid());
        assert!(form.invalid());
        assert!(form.errors().is_none());

        name.disable();
        assert_eq!(form.status(), ControlStatus::Disabled);
        name.enable();
        assert!(form.invalid());
    }

    #[test]
    fn reset_uses_defaults_or_given_value() {
        let nick = FormControl::with_options(json!("lc"), ControlOptions::new().non_nullable());
        let form = FormGroup::new([
            ("name", FormControl::new(json!("Lara")).into()),
            ("nick", nick.into()),
        ]);
        form.patch_value(json!({"name": "Indy", "nick": "ij"}));
        form.get("name").unwrap().mark_as_dirty();
        assert!(form.dirty());

        form.reset();
        assert_eq!(form.value(), json!({"name": null, "nick": "lc"}));
        assert!(form.pristine());

        form.reset_to(json!({"name": "Lara Croft"}));
        assert_eq!(form.value(), json!({"name": "Lara Croft", "nick": "lc"}));

        form.reset_to(Value::Null);
        assert_eq!(form.value(), json!({"name": null, "nick": null}));
    }

    #[test]
    fn dirty_and_touched_propagate() {
        let form = profile();
        let city = form.get("address.city").unwrap();
        city.mark_as_dirty();
        city.mark_as_touched();
        assert!(form.dirty() && form.touched());

        city.mark_as_pristine();
        city.mark_as_untouched();
        assert!(form.pristine() && form.untouched());
    }

    #[test]
    fn events_report_changes() {
        let form = profile();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = form.events().subscribe(move |e| s.borrow_mut().push(e));

        form.get("name").unwrap().mark_as_dirty();
        form.get("name").unwrap().mark_as_dirty();
        assert_eq!(*seen.borrow(), vec![ControlEvent::Pristine(false)]);

        seen.borrow_mut().clear();
        form.get("name").unwrap().set_value(json!("Indy"));
        assert_eq!(
            *seen.borrow(),
            vec![
                ControlEvent::Value(json!({"name": "Indy", "address": {"city": "London"}})),
                ControlEvent::Status(ControlStatus::Valid),
            ]
        );
    }

    #[test]
    fn validator_management_uses_identity() {
        let control = FormControl::new(json!(""));
        let required = Validators::required();
        control.add_validators([required.clone(), required.clone()]);
        assert_eq!(control.validators().len(), 1);
        assert!(control.has_validator(&Validators::required()));
        assert!(control.valid());

        control.update_value_and_validity(UpdateOptions::default());
        assert!(control.has_error("required"));

        control.remove_validators(&[Validators::required()]);
        control.update_value_and_validity(UpdateOptions::default());
        assert!(control.valid());
    }

    #[test]
    fn update_on_blur_and_submit() {
        let on_blur = FormControl::with_options(json!(""), ControlOptions::new().update_on(UpdateOn::Blur));
        on_blur.set_value_from_user(json!("typed"));
        assert_eq!(on_blur.value(), json!(""));
        on_blur.blur_from_user();
        assert_eq!(on_blur.value(), json!("typed"));
        assert!(on_blur.dirty() && on_blur.touched());

        let form = FormGroup::with_options(
            [("q", FormControl::new(json!("")).into())],
            ControlOptions::new().update_on(UpdateOn::Submit),
        );
        let q = form.get("q").unwrap();
        assert_eq!(q.update_on(), UpdateOn::Submit);
        q.set_value_from_user(json!("rust"));
        q.blur_from_user();
        assert!(q.untouched());
        form.submit();
        assert_eq!(form.value(), json!({"q": "rust"}));
        assert!(q.touched() && form.submitted());
    }

    #[test]
    fn get_walks_paths_and_indices() {
        let form = profile();
        assert!(form.get("address.city").is_some());
        assert!(form.get("address.zip").is_none());
        assert!(form.get("").is_none());
        assert_eq!(form.get("address.city").unwrap().root(), *form);
    }

    #[tokio::test]
    async fn async_validation_goes_pending_then_settles() {
        let taken = AsyncValidatorFn::new(|control| {
            let value = control.value();
            Box::pin(async move {
                (value == json!("admin"))
                    .then(|| crate::forms::validators::error("taken", json!(true)))
            })
        });
        let user = FormControl::with_options(json!("admin"), ControlOptions::new().async_validator(taken));
        let form = FormGroup::new([("user", user.clone().into())]);
        assert!(user.pending());
        assert!(form.pending());

        form.run_async_validation().await;
        assert!(user.has_error("taken"));
        assert!(form.invalid());

        user.set_value(json!("lara"));
        let stale = form.run_async_validation();
        user.set_value(json!("admin"));
        stale.await;
        assert!(user.pending());

        form.run_async_validation().await;
        assert!(user.invalid());
    }
}
