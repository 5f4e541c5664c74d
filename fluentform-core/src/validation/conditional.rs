//! Front ends of the validator engine: conditional, dependent and
//! multi-field validation.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexSet;
use tracing::debug;

use super::engine::{ComputationId, ValidatorEngine};
use super::{IntoValidation, Validation, ValidatorSlot};
use crate::error::{FormsError, Result};
use crate::forms::{AbstractControl, AsyncValidatorFn, FormGroup, ValidatorFn};
use crate::reactive::{untracked, Memo, ReadSignal};
use crate::tracking::{TrackerOptions, ValueProxy};

/// The group a dependent computation reads.
#[derive(Clone)]
pub enum SourceGroup {
    Fixed(FormGroup),
    /// A group that may be swapped or not exist yet.
    Dynamic(ReadSignal<Option<FormGroup>>),
}

impl SourceGroup {
    fn current(&self) -> Option<FormGroup> {
        match self {
            SourceGroup::Fixed(group) => Some(group.clone()),
            SourceGroup::Dynamic(signal) => signal.get(),
        }
    }
}

impl From<FormGroup> for SourceGroup {
    fn from(group: FormGroup) -> Self {
        SourceGroup::Fixed(group)
    }
}

impl From<ReadSignal<Option<FormGroup>>> for SourceGroup {
    fn from(signal: ReadSignal<Option<FormGroup>>) -> Self {
        SourceGroup::Dynamic(signal)
    }
}

fn collect_targets<C: Into<AbstractControl>>(targets: impl IntoIterator<Item = C>) -> Vec<AbstractControl> {
    targets.into_iter().map(Into::into).collect()
}

impl ValidatorEngine {
    /// Attach whatever `compute` returns to every control in `targets`,
    /// rerunning when a cell it reads changes.
    pub fn conditional<C, R>(
        &self,
        targets: impl IntoIterator<Item = C>,
        compute: impl Fn() -> R + 'static,
    ) -> ComputationId
    where
        C: Into<AbstractControl>,
        R: IntoValidation<ValidatorFn>,
    {
        self.conditional_slot(collect_targets(targets), compute)
    }

    /// [`ValidatorEngine::conditional`] over async validators.
    pub fn conditional_async<C, R>(
        &self,
        targets: impl IntoIterator<Item = C>,
        compute: impl Fn() -> R + 'static,
    ) -> ComputationId
    where
        C: Into<AbstractControl>,
        R: IntoValidation<AsyncValidatorFn>,
    {
        self.conditional_slot(collect_targets(targets), compute)
    }

    fn conditional_slot<V, R>(
        &self,
        targets: Vec<AbstractControl>,
        compute: impl Fn() -> R + 'static,
    ) -> ComputationId
    where
        V: ValidatorSlot,
        R: IntoValidation<V>,
    {
        self.bind(move || (targets.clone(), compute().into_validation()))
    }

    /// Like [`ValidatorEngine::conditional`], with `compute` reading the
    /// value of `source` through a tracking proxy. While a dynamic source
    /// holds no group the run counts as not ready.
    pub fn dependent<C, R>(
        &self,
        targets: impl IntoIterator<Item = C>,
        source: impl Into<SourceGroup>,
        compute: impl Fn(&ValueProxy) -> R + 'static,
    ) -> ComputationId
    where
        C: Into<AbstractControl>,
        R: IntoValidation<ValidatorFn>,
    {
        self.dependent_slot(collect_targets(targets), source.into(), compute)
    }

    pub fn dependent_async<C, R>(
        &self,
        targets: impl IntoIterator<Item = C>,
        source: impl Into<SourceGroup>,
        compute: impl Fn(&ValueProxy) -> R + 'static,
    ) -> ComputationId
    where
        C: Into<AbstractControl>,
        R: IntoValidation<AsyncValidatorFn>,
    {
        self.dependent_slot(collect_targets(targets), source.into(), compute)
    }

    fn dependent_slot<V, R>(
        &self,
        targets: Vec<AbstractControl>,
        source: SourceGroup,
        compute: impl Fn(&ValueProxy) -> R + 'static,
    ) -> ComputationId
    where
        V: ValidatorSlot,
        R: IntoValidation<V>,
    {
        let proxy = self.source_proxy(source);
        self.bind(move || {
            let validation = match proxy.get() {
                Some(proxy) => compute(&proxy).into_validation(),
                None => Validation::NotReady,
            };
            (targets.clone(), validation)
        })
    }

    /// Proxy of the current source group, rebuilt when the group instance
    /// changes. The previous proxy is disposed before the new one is built.
    fn source_proxy(&self, source: SourceGroup) -> ReadSignal<Option<ValueProxy>> {
        let scope = self.scope().clone();
        Memo::with_previous(move |previous: Option<&Option<ValueProxy>>| {
            let group = source.current();
            let previous = previous.and_then(Option::as_ref);
            match (previous, group) {
                (Some(proxy), Some(group)) if proxy.group().ptr_eq(&group) => Some(proxy.clone()),
                (previous, group) => {
                    if let Some(stale) = previous {
                        debug!(group = stale.group().id().raw(), "source group swapped");
                        stale.dispose();
                    }
                    group.map(|group| untracked(|| ValueProxy::new(&group, &scope, TrackerOptions::new())))
                }
            }
        })
        .read_only()
    }

    /// Validation spanning several fields of `group`.
    ///
    /// With `fields`, the named controls (dot paths allowed) are the
    /// targets and a missing one is an error. Without, the targets are the
    /// fields `compute` reads, rediscovered on every run. One untracked
    /// discovery run happens before the binding is made.
    pub fn multi_field<R>(
        &self,
        group: &FormGroup,
        compute: impl Fn(&ValueProxy) -> R + 'static,
        fields: Option<Vec<String>>,
    ) -> Result<ComputationId>
    where
        R: IntoValidation<ValidatorFn>,
    {
        let fixed = fields
            .map(|fields| {
                fields
                    .iter()
                    .map(|path| {
                        group
                            .get(path)
                            .ok_or_else(|| FormsError::ControlNotFound(path.clone()))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        let read: Rc<RefCell<IndexSet<String>>> = Rc::new(RefCell::new(IndexSet::new()));
        let recorder = read.clone();
        let proxy = ValueProxy::new(
            group,
            self.scope(),
            TrackerOptions::new().on_track(move |path| {
                recorder.borrow_mut().insert(path.to_string());
            }),
        );
        if fixed.is_none() {
            untracked(|| {
                compute(&proxy);
            });
            debug!(fields = ?read.borrow(), "multi-field validation discovered fields");
        }

        let group = group.clone();
        Ok(self.bind(move || {
            read.borrow_mut().clear();
            let validation = compute(&proxy).into_validation();
            let targets = match &fixed {
                Some(targets) => targets.clone(),
                None => read
                    .borrow()
                    .iter()
                    .filter_map(|path| group.get(path))
                    .collect(),
            };
            (targets, validation)
        }))
    }
}
