//! Form-group builder
//!
//! [`FormBuilder::build`] turns a [`FormGroupDefinition`] into an
//! [`ExtendedFormGroup`]. Builder definitions run once up front and then
//! again, inside an effect, whenever a cell they read changes.

mod definition;
mod extended;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::error::Result;
use crate::forms::{ControlOptions, FormGroup};
use crate::reactive::{untracked, Effect, Scope};

pub use definition::{
    fields, ControlDescriptor, FieldBuilder, FieldDef, FieldDefs, FormGroupDefinition,
};
pub use extended::{ExtendedFormGroup, ResetConfig, ValidationRule, ValueChangeEffectOptions};

use definition::{value_defs, DefinitionState};

/// Options for the built group.
#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    /// Options of the root group itself.
    pub options: ControlOptions,
    /// Debounce window of the group's value proxy.
    pub debounce: Option<Duration>,
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: ControlOptions) -> Self {
        self.options = options;
        self
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }
}

/// Builds extended groups owned by a scope.
#[derive(Debug, Clone)]
pub struct FormBuilder {
    scope: Scope,
}

impl FormBuilder {
    /// Every group built is disposed together with `scope`.
    pub fn new(scope: &Scope) -> Self {
        Self {
            scope: scope.clone(),
        }
    }

    pub fn build(&self, definition: FormGroupDefinition, config: BuildConfig) -> Result<ExtendedFormGroup> {
        let mut state = DefinitionState::default();
        let group = match &definition {
            FormGroupDefinition::Value(value) => {
                state.build_group(&value_defs(value, "")?, &config.options)?
            }
            FormGroupDefinition::Fields(defs) => state.build_group(defs, &config.options)?,
            FormGroupDefinition::Builder(builder) => match untracked(|| builder(&FieldBuilder)) {
                Ok(defs) => state.build_group(&defs, &config.options)?,
                Err(_) => {
                    trace!("form definition not ready, starting empty");
                    FormGroup::with_options(Vec::<(String, _)>::new(), config.options.clone())
                }
            },
        };

        let form = ExtendedFormGroup::new(group, self.scope.child(), config.debounce);
        if let FormGroupDefinition::Builder(builder) = definition {
            let state = Rc::new(RefCell::new(state));
            let group = form.group().clone();
            let effect = Effect::new_lazy(move || match builder(&FieldBuilder) {
                Ok(defs) => {
                    let applied = untracked(|| state.borrow_mut().apply(&group, &defs, ""));
                    if let Err(err) = applied {
                        warn!(error = %err, "form definition rejected");
                    }
                }
                Err(_) => trace!("form definition not ready, keeping current shape"),
            });
            form.scope().add_effect(effect);
        }
        Ok(form)
    }
}
