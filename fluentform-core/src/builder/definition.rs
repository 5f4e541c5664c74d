//! Form-group definitions
//!
//! A definition describes the fields a group should have. The first run
//! builds the group; later runs (builder definitions rerun whenever a cell
//! they read changes) are diffed against the live group:
//!
//! - missing controls are added
//! - a control whose `update_on` changed is recreated, keeping its value
//! - value and disabled state changes are applied in place
//! - validators are replaced when the declared list changed
//! - controls no longer declared are soft-removed (reset to null, disabled)

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::error::{FormsError, NotReady, Result};
use crate::forms::{
    AbstractControl, AsyncValidatorFn, ControlKind, ControlOptions, FormControl, FormGroup,
    UpdateOn, UpdateOptions, ValidatorFn,
};
use crate::validation::same_list;

pub type FieldDefs = IndexMap<String, FieldDef>;

/// Build a [`FieldDefs`] map from name/definition pairs.
pub fn fields<K, D>(entries: impl IntoIterator<Item = (K, D)>) -> FieldDefs
where
    K: Into<String>,
    D: Into<FieldDef>,
{
    entries
        .into_iter()
        .map(|(name, def)| (name.into(), def.into()))
        .collect()
}

#[derive(Debug, Clone)]
pub enum FieldDef {
    /// An existing control, used as is.
    Control(AbstractControl),
    Descriptor(ControlDescriptor),
    /// A plain control holding this value.
    Value(Value),
    Group(FieldDefs),
}

impl From<Value> for FieldDef {
    fn from(value: Value) -> Self {
        FieldDef::Value(value)
    }
}

impl From<ControlDescriptor> for FieldDef {
    fn from(descriptor: ControlDescriptor) -> Self {
        FieldDef::Descriptor(descriptor)
    }
}

impl From<AbstractControl> for FieldDef {
    fn from(control: AbstractControl) -> Self {
        FieldDef::Control(control)
    }
}

impl From<FormControl> for FieldDef {
    fn from(control: FormControl) -> Self {
        FieldDef::Control(control.into())
    }
}

impl From<FormGroup> for FieldDef {
    fn from(group: FormGroup) -> Self {
        FieldDef::Control(group.into())
    }
}

impl From<FieldDefs> for FieldDef {
    fn from(defs: FieldDefs) -> Self {
        FieldDef::Group(defs)
    }
}

/// Declarative description of a leaf control.
#[derive(Debug, Clone, Default)]
pub struct ControlDescriptor {
    pub value: Value,
    pub disabled: bool,
    pub non_nullable: bool,
    pub update_on: Option<UpdateOn>,
    pub validators: Vec<ValidatorFn>,
    pub async_validators: Vec<AsyncValidatorFn>,
}

impl ControlDescriptor {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn non_nullable(mut self) -> Self {
        self.non_nullable = true;
        self
    }

    pub fn update_on(mut self, update_on: UpdateOn) -> Self {
        self.update_on = Some(update_on);
        self
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

    fn options(&self) -> ControlOptions {
        ControlOptions {
            validators: self.validators.clone(),
            async_validators: self.async_validators.clone(),
            update_on: self.update_on,
            non_nullable: self.non_nullable,
            disabled: self.disabled,
        }
    }

    fn create(&self) -> AbstractControl {
        FormControl::with_options(self.value.clone(), self.options()).into()
    }
}

/// Helpers handed to builder definitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldBuilder;

impl FieldBuilder {
    pub fn control(&self, value: Value) -> ControlDescriptor {
        ControlDescriptor::new(value)
    }

    pub fn group<K, D>(&self, entries: impl IntoIterator<Item = (K, D)>) -> FieldDef
    where
        K: Into<String>,
        D: Into<FieldDef>,
    {
        FieldDef::Group(fields(entries))
    }
}

type BuilderFn = dyn Fn(&FieldBuilder) -> std::result::Result<FieldDefs, NotReady>;

/// What a group is built from.
#[derive(Clone)]
pub enum FormGroupDefinition {
    /// A JSON object; nested objects become nested groups.
    Value(Value),
    Fields(FieldDefs),
    /// Rerun whenever a cell it reads changes.
    Builder(Rc<BuilderFn>),
}

impl FormGroupDefinition {
    pub fn builder(
        f: impl Fn(&FieldBuilder) -> std::result::Result<FieldDefs, NotReady> + 'static,
    ) -> Self {
        FormGroupDefinition::Builder(Rc::new(f))
    }
}

impl fmt::Debug for FormGroupDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormGroupDefinition::Value(value) => f.debug_tuple("Value").field(value).finish(),
            FormGroupDefinition::Fields(defs) => f.debug_tuple("Fields").field(defs).finish(),
            FormGroupDefinition::Builder(_) => f.write_str("Builder(..)"),
        }
    }
}

/// Turn a JSON object into field definitions.
pub(crate) fn value_defs(value: &Value, path: &str) -> Result<FieldDefs> {
    let Value::Object(map) = value else {
        let field = if path.is_empty() { "<root>" } else { path };
        return Err(FormsError::invalid_field(field, "expected an object"));
    };
    map.iter()
        .map(|(name, v)| {
            let def = match v {
                Value::Object(_) => FieldDef::Group(value_defs(v, &join(path, name))?),
                _ => FieldDef::Value(v.clone()),
            };
            Ok((name.clone(), def))
        })
        .collect()
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

#[derive(Debug, Clone)]
struct Declared {
    value: Value,
    disabled: bool,
    validators: Vec<ValidatorFn>,
    async_validators: Vec<AsyncValidatorFn>,
}

/// What the last definition run declared, per control path.
#[derive(Debug, Default)]
pub(crate) struct DefinitionState {
    declared: HashMap<String, Declared>,
    /// Paths soft-removed by an earlier run and still absent.
    removed: HashSet<String>,
}

impl DefinitionState {
    pub(crate) fn build_group(&mut self, defs: &FieldDefs, options: &ControlOptions) -> Result<FormGroup> {
        let controls = self.build_children(defs, "")?;
        Ok(FormGroup::with_options(controls, options.clone()))
    }

    fn build_children(&mut self, defs: &FieldDefs, prefix: &str) -> Result<Vec<(String, AbstractControl)>> {
        defs.iter()
            .map(|(name, def)| Ok((name.clone(), self.build_control(def, &join(prefix, name))?)))
            .collect()
    }

    fn build_control(&mut self, def: &FieldDef, path: &str) -> Result<AbstractControl> {
        match def {
            FieldDef::Control(control) => Ok(control.clone()),
            FieldDef::Group(defs) => Ok(FormGroup::new(self.build_children(defs, path)?).into()),
            FieldDef::Value(value) => Ok(self.declare_and_create(path, &ControlDescriptor::new(value.clone()))),
            FieldDef::Descriptor(descriptor) => Ok(self.declare_and_create(path, descriptor)),
        }
    }

    fn declare_and_create(&mut self, path: &str, descriptor: &ControlDescriptor) -> AbstractControl {
        self.declare(path, descriptor);
        descriptor.create()
    }

    fn declare(&mut self, path: &str, descriptor: &ControlDescriptor) {
        self.declared.insert(
            path.to_string(),
            Declared {
                value: descriptor.value.clone(),
                disabled: descriptor.disabled,
                validators: descriptor.validators.clone(),
                async_validators: descriptor.async_validators.clone(),
            },
        );
    }

    fn forget(&mut self, path: &str) {
        let nested = format!("{path}.");
        self.declared
            .retain(|declared, _| declared != path && !declared.starts_with(&nested));
    }

    /// Bring `group` in line with `defs`.
    pub(crate) fn apply(&mut self, group: &FormGroup, defs: &FieldDefs, prefix: &str) -> Result<()> {
        for (name, def) in defs {
            let path = join(prefix, name);
            self.removed.remove(&path);
            let Some(existing) = group.get_control(name) else {
                let control = self.build_control(def, &path)?;
                debug!(field = %path, "definition added control");
                group.add_control(name.clone(), control);
                continue;
            };
            match def {
                FieldDef::Group(nested) => {
                    let nested_group = FormGroup::try_from(existing).map_err(|_| {
                        FormsError::invalid_field(&path, "a group definition targets a control")
                    })?;
                    self.apply(&nested_group, nested, &path)?;
                }
                FieldDef::Control(control) => {
                    if !existing.ptr_eq(control) {
                        debug!(field = %path, "definition replaced control");
                        self.forget(&path);
                        group.set_control(name.clone(), control.clone());
                    }
                }
                FieldDef::Value(value) => {
                    let descriptor = ControlDescriptor::new(value.clone());
                    self.update_control(group, name, &path, &existing, &descriptor)?;
                }
                FieldDef::Descriptor(descriptor) => {
                    self.update_control(group, name, &path, &existing, descriptor)?;
                }
            }
        }

        for (name, control) in group.named_children() {
            if defs.contains_key(&name) {
                continue;
            }
            let path = join(prefix, &name);
            if !self.removed.insert(path.clone()) {
                continue;
            }
            debug!(field = %path, "definition soft-removed control");
            self.forget(&path);
            control.reset_to(Value::Null);
            control.disable();
        }
        Ok(())
    }

    fn update_control(
        &mut self,
        group: &FormGroup,
        name: &str,
        path: &str,
        existing: &AbstractControl,
        descriptor: &ControlDescriptor,
    ) -> Result<()> {
        if existing.kind() != ControlKind::Control {
            return Err(FormsError::invalid_field(path, "a control definition targets a group"));
        }

        if existing.own_update_on() != descriptor.update_on {
            let current = existing.value();
            let replacement = descriptor.create();
            replacement.set_value_with(current, UpdateOptions::silent());
            debug!(field = %path, update_on = ?descriptor.update_on, "definition recreated control");
            self.declare(path, descriptor);
            group.set_control(name.to_string(), replacement);
            return Ok(());
        }

        let previous = self.declared.get(path).cloned();
        let value_changed = match &previous {
            Some(declared) => declared.value != descriptor.value,
            None => existing.value() != descriptor.value,
        };
        if value_changed {
            existing.reset_to(descriptor.value.clone());
        }

        let disabled_changed = match &previous {
            Some(declared) => declared.disabled != descriptor.disabled,
            None => existing.disabled() != descriptor.disabled,
        };
        if disabled_changed {
            if descriptor.disabled {
                existing.disable();
            } else {
                existing.enable();
            }
        }

        let (old_sync, old_async) = previous
            .map(|declared| (declared.validators, declared.async_validators))
            .unwrap_or_default();
        let sync_changed = !same_list(&old_sync, &descriptor.validators);
        let async_changed = !same_list(&old_async, &descriptor.async_validators);
        if sync_changed {
            existing.remove_validators(&old_sync);
            existing.add_validators(descriptor.validators.iter().cloned());
        }
        if async_changed {
            existing.remove_async_validators(&old_async);
            existing.add_async_validators(descriptor.async_validators.iter().cloned());
        }
        if sync_changed || async_changed {
            debug!(field = %path, "definition replaced validators");
            existing.update_value_and_validity(UpdateOptions::default());
        }

        self.declare(path, descriptor);
        Ok(())
    }
}
