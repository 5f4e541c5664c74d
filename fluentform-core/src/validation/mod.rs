//! Conditional validation
//!
//! A validation computation is a reactive closure returning a
//! [`Validation`]: which validators should be attached to its target
//! controls right now. The [`ValidatorEngine`] runs each computation inside
//! an effect and diffs the result against what it attached last time, so a
//! control carries exactly the validators its computations currently ask
//! for and an unchanged result touches nothing.
//!
//! Sync and async validators go through the same machinery; the
//! [`ValidatorSlot`] trait is the only place where they differ.

mod conditional;
mod engine;

use smallvec::{smallvec, SmallVec};

use crate::error::ComputeFailure;
use crate::forms::{AbstractControl, AsyncValidatorFn, UpdateOptions, ValidationErrors, ValidatorFn};

pub use conditional::SourceGroup;
pub use engine::{ComputationId, EngineStats, ValidatorEngine};

/// Result of one run of a validation computation.
#[derive(Debug, Clone)]
pub enum Validation<V = ValidatorFn> {
    /// No validators.
    Clear,
    /// Exactly these validators.
    Apply(SmallVec<[V; 2]>),
    /// A validator that always fails with these errors.
    Errors(ValidationErrors),
    /// An input is not available yet; keep the current validators.
    NotReady,
    /// The computation failed; keep the current validators.
    Failed(String),
}

impl<V> Validation<V> {
    pub fn apply(validator: V) -> Self {
        Validation::Apply(smallvec![validator])
    }

    pub fn apply_all(validators: impl IntoIterator<Item = V>) -> Self {
        Validation::Apply(validators.into_iter().collect())
    }

    /// `validator` while `condition` holds, nothing otherwise.
    pub fn when(condition: bool, validator: V) -> Self {
        if condition {
            Self::apply(validator)
        } else {
            Validation::Clear
        }
    }

    /// Fail with `errors` while `condition` holds.
    pub fn errors_when(condition: bool, errors: ValidationErrors) -> Self {
        if condition {
            Validation::Errors(errors)
        } else {
            Validation::Clear
        }
    }

    /// Whether the run keeps the previous bindings untouched.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Validation::NotReady | Validation::Failed(_))
    }
}

/// Conversion of a computation's return value into a [`Validation`].
pub trait IntoValidation<V> {
    fn into_validation(self) -> Validation<V>;
}

impl<V> IntoValidation<V> for Validation<V> {
    fn into_validation(self) -> Validation<V> {
        self
    }
}

impl<V, T, E> IntoValidation<V> for Result<T, E>
where
    T: IntoValidation<V>,
    E: Into<ComputeFailure>,
{
    fn into_validation(self) -> Validation<V> {
        match self {
            Ok(value) => value.into_validation(),
            Err(error) => match error.into() {
                ComputeFailure::NotReady(_) => Validation::NotReady,
                ComputeFailure::Failed(message) => Validation::Failed(message),
            },
        }
    }
}

macro_rules! slot_conversions {
    ($slot:ty) => {
        impl IntoValidation<$slot> for $slot {
            fn into_validation(self) -> Validation<$slot> {
                Validation::apply(self)
            }
        }

        impl IntoValidation<$slot> for Option<$slot> {
            fn into_validation(self) -> Validation<$slot> {
                self.map_or(Validation::Clear, Validation::apply)
            }
        }

        impl IntoValidation<$slot> for Vec<$slot> {
            fn into_validation(self) -> Validation<$slot> {
                if self.is_empty() {
                    Validation::Clear
                } else {
                    Validation::apply_all(self)
                }
            }
        }

        impl IntoValidation<$slot> for Option<ValidationErrors> {
            fn into_validation(self) -> Validation<$slot> {
                self.map_or(Validation::Clear, Validation::Errors)
            }
        }
    };
}

slot_conversions!(ValidatorFn);
slot_conversions!(AsyncValidatorFn);

/// A kind of validator list on a control.
pub trait ValidatorSlot: Clone + std::fmt::Debug + 'static {
    /// Name used in log output.
    const KIND: &'static str;

    /// Identity comparison.
    fn same(&self, other: &Self) -> bool;

    /// Key consistent with [`ValidatorSlot::same`] while the validator is alive.
    fn identity(&self) -> usize;

    /// A validator failing with `errors`.
    fn from_errors(errors: ValidationErrors) -> Self;

    fn attached(control: &AbstractControl) -> Vec<Self>;

    fn attach(control: &AbstractControl, validators: &[Self]);

    fn detach(control: &AbstractControl, validators: &[Self]);

    /// Rerun validation after the list changed.
    fn revalidate(control: &AbstractControl) {
        control.update_value_and_validity(UpdateOptions::default());
    }
}

impl ValidatorSlot for ValidatorFn {
    const KIND: &'static str = "sync";

    fn same(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }

    fn identity(&self) -> usize {
        self.addr()
    }

    fn from_errors(errors: ValidationErrors) -> Self {
        ValidatorFn::always_fail(errors)
    }

    fn attached(control: &AbstractControl) -> Vec<Self> {
        control.validators()
    }

    fn attach(control: &AbstractControl, validators: &[Self]) {
        control.add_validators(validators.iter().cloned());
    }

    fn detach(control: &AbstractControl, validators: &[Self]) {
        control.remove_validators(validators);
    }
}

impl ValidatorSlot for AsyncValidatorFn {
    const KIND: &'static str = "async";

    fn same(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }

    fn identity(&self) -> usize {
        self.addr()
    }

    fn from_errors(errors: ValidationErrors) -> Self {
        AsyncValidatorFn::always_fail(errors)
    }

    fn attached(control: &AbstractControl) -> Vec<Self> {
        control.async_validators()
    }

    fn attach(control: &AbstractControl, validators: &[Self]) {
        control.add_async_validators(validators.iter().cloned());
    }

    fn detach(control: &AbstractControl, validators: &[Self]) {
        control.remove_async_validators(validators);
    }
}

/// Same length and the same validator at every index.
pub(crate) fn same_list<V: ValidatorSlot>(a: &[V], b: &[V]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same(y))
}
