//! Extended form group
//!
//! A [`FormGroup`] bundled with the scope that owns everything derived from
//! it: lazily created state cells, the value proxy, the validator engine
//! and the effects installed through the fluent `with_*` methods.

use std::cell::{Cell, OnceCell};
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::{FormsError, Result};
use crate::forms::{
    AbstractControl, AsyncValidatorFn, ControlEvent, ControlStatus, FormGroup, ValidatorFn,
};
use crate::reactive::{to_cell, untracked, CellOptions, Effect, ReadSignal, Scope};
use crate::tracking::{TrackerOptions, ValueProxy};
use crate::validation::{IntoValidation, SourceGroup, Validation, ValidatorEngine};

type RuleFn<V> = Rc<dyn Fn(&ValueProxy) -> Validation<V>>;

/// One validation rule of a field, see [`ExtendedFormGroup::with_validation`].
#[derive(Clone)]
pub enum ValidationRule {
    Static(ValidatorFn),
    StaticAsync(AsyncValidatorFn),
    /// Recomputed whenever a field it reads changes.
    Conditional(RuleFn<ValidatorFn>),
    ConditionalAsync(RuleFn<AsyncValidatorFn>),
}

impl ValidationRule {
    pub fn conditional<R>(compute: impl Fn(&ValueProxy) -> R + 'static) -> Self
    where
        R: IntoValidation<ValidatorFn>,
    {
        ValidationRule::Conditional(Rc::new(move |form| compute(form).into_validation()))
    }

    pub fn conditional_async<R>(compute: impl Fn(&ValueProxy) -> R + 'static) -> Self
    where
        R: IntoValidation<AsyncValidatorFn>,
    {
        ValidationRule::ConditionalAsync(Rc::new(move |form| compute(form).into_validation()))
    }
}

impl From<ValidatorFn> for ValidationRule {
    fn from(validator: ValidatorFn) -> Self {
        ValidationRule::Static(validator)
    }
}

impl From<AsyncValidatorFn> for ValidationRule {
    fn from(validator: AsyncValidatorFn) -> Self {
        ValidationRule::StaticAsync(validator)
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationRule::Static(v) => f.debug_tuple("Static").field(v).finish(),
            ValidationRule::StaticAsync(v) => f.debug_tuple("StaticAsync").field(v).finish(),
            ValidationRule::Conditional(_) => f.write_str("Conditional(..)"),
            ValidationRule::ConditionalAsync(_) => f.write_str("ConditionalAsync(..)"),
        }
    }
}

/// Options for [`ExtendedFormGroup::reset_from_signal`].
#[derive(Clone, Default)]
pub struct ResetConfig {
    pub map_value: Option<Rc<dyn Fn(Value) -> Value>>,
}

impl ResetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_value(mut self, f: impl Fn(Value) -> Value + 'static) -> Self {
        self.map_value = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for ResetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetConfig")
            .field("map_value", &self.map_value.is_some())
            .finish()
    }
}

/// Options for [`ExtendedFormGroup::with_value_change_effect`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueChangeEffectOptions {
    pub debounce: Option<Duration>,
}

impl ValueChangeEffectOptions {
    pub fn debounce(window: Duration) -> Self {
        Self {
            debounce: Some(window),
        }
    }
}

#[derive(Clone)]
pub struct ExtendedFormGroup {
    inner: Rc<ExtendedInner>,
}

struct ExtendedInner {
    group: FormGroup,
    scope: Scope,
    engine: ValidatorEngine,
    debounce: Option<Duration>,
    proxy: OnceCell<ValueProxy>,
    value: OnceCell<ReadSignal<Value>>,
    status: OnceCell<ReadSignal<ControlStatus>>,
    pristine: OnceCell<ReadSignal<bool>>,
    touched: OnceCell<ReadSignal<bool>>,
}

impl ExtendedFormGroup {
    pub(crate) fn new(group: FormGroup, scope: Scope, debounce: Option<Duration>) -> Self {
        let engine = ValidatorEngine::new(&scope);
        Self {
            inner: Rc::new(ExtendedInner {
                group,
                scope,
                engine,
                debounce,
                proxy: OnceCell::new(),
                value: OnceCell::new(),
                status: OnceCell::new(),
                pristine: OnceCell::new(),
                touched: OnceCell::new(),
            }),
        }
    }

    pub fn group(&self) -> &FormGroup {
        &self.inner.group
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn engine(&self) -> &ValidatorEngine {
        &self.inner.engine
    }

    /// Tear down every cell, effect and subscription owned by this group.
    pub fn dispose(&self) {
        self.inner.scope.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.scope.is_disposed()
    }

    fn cell_options<T>(&self) -> CellOptions<T> {
        CellOptions::new().with_scope(&self.inner.scope)
    }

    /// Tracking proxy over the group's value.
    pub fn value_proxy(&self) -> ValueProxy {
        self.inner
            .proxy
            .get_or_init(|| {
                let mut options = TrackerOptions::new();
                options.debounce = self.inner.debounce;
                ValueProxy::new(&self.inner.group, &self.inner.scope, options)
            })
            .clone()
    }

    /// Cell of one field's value, `None` if the field does not exist.
    pub fn field_signal(&self, name: &str) -> Option<ReadSignal<Value>> {
        self.value_proxy().tracker().get_or_create_cell(name)
    }

    pub fn value_signal(&self) -> ReadSignal<Value> {
        self.inner
            .value
            .get_or_init(|| {
                to_cell(&self.inner.group.value_changes(), self.inner.group.value(), self.cell_options())
            })
            .clone()
    }

    pub fn status_signal(&self) -> ReadSignal<ControlStatus> {
        self.inner
            .status
            .get_or_init(|| {
                to_cell(&self.inner.group.status_changes(), self.inner.group.status(), self.cell_options())
            })
            .clone()
    }

    pub fn pristine_signal(&self) -> ReadSignal<bool> {
        self.inner
            .pristine
            .get_or_init(|| {
                let stream = self.inner.group.events().filter_map(|event| match event {
                    ControlEvent::Pristine(pristine) => Some(pristine),
                    _ => None,
                });
                to_cell(&stream, self.inner.group.pristine(), self.cell_options())
            })
            .clone()
    }

    pub fn dirty_signal(&self) -> ReadSignal<bool> {
        self.pristine_signal().map(|pristine| !pristine)
    }

    pub fn touched_signal(&self) -> ReadSignal<bool> {
        self.inner
            .touched
            .get_or_init(|| {
                let stream = self.inner.group.events().filter_map(|event| match event {
                    ControlEvent::Touched(touched) => Some(touched),
                    _ => None,
                });
                to_cell(&stream, self.inner.group.touched(), self.cell_options())
            })
            .clone()
    }

    pub fn untouched_signal(&self) -> ReadSignal<bool> {
        self.touched_signal().map(|touched| !touched)
    }

    pub fn valid_signal(&self) -> ReadSignal<bool> {
        self.status_signal().map(|status| status == ControlStatus::Valid)
    }

    pub fn invalid_signal(&self) -> ReadSignal<bool> {
        self.status_signal().map(|status| status == ControlStatus::Invalid)
    }

    /// Reset the group whenever `source` changes, starting on the next
    /// flush.
    ///
    /// The value is serialized to JSON and passed through
    /// `config.map_value`. A source value of `null` on the very first run is
    /// skipped before mapping, so a source that starts out empty does not
    /// wipe the initial values.
    pub fn reset_from_signal<T>(&self, source: ReadSignal<T>, config: ResetConfig) -> Self
    where
        T: Serialize + Clone + 'static,
    {
        let group = self.inner.group.clone();
        let first = Cell::new(true);
        let effect = Effect::new_lazy(move || {
            let value = match serde_json::to_value(source.get()) {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, "reset source did not serialize");
                    return;
                }
            };
            if first.replace(false) && value.is_null() {
                trace!("skipping initial null reset");
                return;
            }
            let value = match &config.map_value {
                Some(map) => map(value),
                None => value,
            };
            untracked(|| group.reset_to(value));
        });
        self.inner.scope.add_effect(effect);
        self.clone()
    }

    /// Attach rules to fields, addressed by dot path.
    ///
    /// Static rules are attached once; conditional ones follow the fields
    /// they read through the group's value proxy.
    pub fn with_validation<K>(&self, rules: impl IntoIterator<Item = (K, Vec<ValidationRule>)>) -> Result<Self>
    where
        K: AsRef<str>,
    {
        let mut resolved: Vec<(AbstractControl, Vec<ValidationRule>)> = Vec::new();
        for (path, field_rules) in rules {
            let path = path.as_ref();
            let control = self
                .inner
                .group
                .get(path)
                .ok_or_else(|| FormsError::ControlNotFound(path.to_string()))?;
            resolved.push((control, field_rules));
        }

        let engine = &self.inner.engine;
        for (control, field_rules) in resolved {
            for rule in field_rules {
                let target = [control.clone()];
                match rule {
                    ValidationRule::Static(validator) => {
                        engine.conditional(target, move || validator.clone());
                    }
                    ValidationRule::StaticAsync(validator) => {
                        engine.conditional_async(target, move || validator.clone());
                    }
                    ValidationRule::Conditional(compute) => {
                        let proxy = self.value_proxy();
                        engine.conditional(target, move || compute(&proxy));
                    }
                    ValidationRule::ConditionalAsync(compute) => {
                        let proxy = self.value_proxy();
                        engine.conditional_async(target, move || compute(&proxy));
                    }
                }
            }
        }
        Ok(self.clone())
    }

    /// Validation over several fields; see [`ValidatorEngine::multi_field`].
    pub fn with_multi_field_validation<R>(
        &self,
        compute: impl Fn(&ValueProxy) -> R + 'static,
        fields: Option<Vec<String>>,
    ) -> Result<Self>
    where
        R: IntoValidation<ValidatorFn>,
    {
        self.inner.engine.multi_field(&self.inner.group, compute, fields)?;
        Ok(self.clone())
    }

    /// Validation of the field at `path` depending on another group's value.
    pub fn with_dependent_validation<R>(
        &self,
        path: &str,
        source: impl Into<SourceGroup>,
        compute: impl Fn(&ValueProxy) -> R + 'static,
    ) -> Result<Self>
    where
        R: IntoValidation<ValidatorFn>,
    {
        let control = self
            .inner
            .group
            .get(path)
            .ok_or_else(|| FormsError::ControlNotFound(path.to_string()))?;
        self.inner.engine.dependent([control], source, compute);
        Ok(self.clone())
    }

    /// Run `f` whenever a field it reads changes, but only once the group
    /// has been edited by the user. Changes of pristine fields are ignored.
    pub fn with_value_change_effect(
        &self,
        f: impl Fn(&ValueProxy) + 'static,
        options: ValueChangeEffectOptions,
    ) -> Self {
        let mut tracker_options = TrackerOptions::new().dirty_only();
        tracker_options.debounce = options.debounce;
        let proxy = ValueProxy::new(&self.inner.group, &self.inner.scope, tracker_options);
        let dirty = self.dirty_signal();
        let armed = Cell::new(false);
        let effect = Effect::new(move || {
            if !armed.get() {
                if !dirty.get() {
                    return;
                }
                armed.set(true);
            }
            f(&proxy);
        });
        self.inner.scope.add_effect(effect);
        self.clone()
    }

    /// Run `f` as an effect owned by this group.
    pub fn with_effect(&self, mut f: impl FnMut(&ExtendedFormGroup) + 'static) -> Self {
        let weak: Weak<ExtendedInner> = Rc::downgrade(&self.inner);
        let effect = Effect::new(move || {
            if let Some(inner) = weak.upgrade() {
                f(&ExtendedFormGroup { inner });
            }
        });
        self.inner.scope.add_effect(effect);
        self.clone()
    }
}

impl Deref for ExtendedFormGroup {
    type Target = FormGroup;

    fn deref(&self) -> &FormGroup {
        &self.inner.group
    }
}

impl fmt::Debug for ExtendedFormGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedFormGroup")
            .field("group", &self.inner.group)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
