//! Validator functions and the built-in validator set.
//!
//! Validators are reference-counted closures compared by identity: the
//! validator engine decides whether a control "has" a validator by pointer,
//! never by behaviour. The shared built-ins (`required`, `required_true`,
//! `null_validator`) hand out the same instance on every call so identity
//! checks against them work.

use std::fmt;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use indexmap::IndexMap;
use serde_json::{json, Value};

use super::control::AbstractControl;

/// Map of error key to error detail, `{"required": true}` style.
pub type ValidationErrors = IndexMap<String, Value>;

type SyncFn = dyn Fn(&AbstractControl) -> Option<ValidationErrors>;
type AsyncFn = dyn Fn(&AbstractControl) -> LocalBoxFuture<'static, Option<ValidationErrors>>;

fn same_allocation<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

fn allocation_addr<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}

/// A synchronous validator.
#[derive(Clone)]
pub struct ValidatorFn(Rc<SyncFn>);

impl ValidatorFn {
    pub fn new(f: impl Fn(&AbstractControl) -> Option<ValidationErrors> + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// A validator that always fails with `errors`.
    pub fn always_fail(errors: ValidationErrors) -> Self {
        Self::new(move |_| Some(errors.clone()))
    }

    pub fn validate(&self, control: &AbstractControl) -> Option<ValidationErrors> {
        (self.0)(control)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        same_allocation(&self.0, &other.0)
    }

    /// Address identifying this validator while it is alive.
    pub(crate) fn addr(&self) -> usize {
        allocation_addr(&self.0)
    }
}

impl PartialEq for ValidatorFn {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ValidatorFn {}

impl fmt::Debug for ValidatorFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorFn({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// An asynchronous validator.
#[derive(Clone)]
pub struct AsyncValidatorFn(Rc<AsyncFn>);

impl AsyncValidatorFn {
    pub fn new(
        f: impl Fn(&AbstractControl) -> LocalBoxFuture<'static, Option<ValidationErrors>> + 'static,
    ) -> Self {
        Self(Rc::new(f))
    }

    /// An async validator that always resolves to `errors`.
    pub fn always_fail(errors: ValidationErrors) -> Self {
        Self::new(move |_| {
            let errors = errors.clone();
            Box::pin(async move { Some(errors) })
        })
    }

    pub fn validate(&self, control: &AbstractControl) -> LocalBoxFuture<'static, Option<ValidationErrors>> {
        (self.0)(control)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        same_allocation(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        allocation_addr(&self.0)
    }
}

impl PartialEq for AsyncValidatorFn {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for AsyncValidatorFn {}

impl fmt::Debug for AsyncValidatorFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncValidatorFn({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// Build an error map with a single entry.
pub fn error(key: impl Into<String>, detail: Value) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.insert(key.into(), detail);
    errors
}

/// Merge two optional error maps; later keys win.
pub fn merge_errors(
    a: Option<ValidationErrors>,
    b: Option<ValidationErrors>,
) -> Option<ValidationErrors> {
    match (a, b) {
        (None, None) => None,
        (Some(errors), None) | (None, Some(errors)) => Some(errors),
        (Some(mut a), Some(b)) => {
            a.extend(b);
            Some(a)
        }
    }
}

/// `null`, `""` and `[]` count as empty; `{}` and `0` do not.
pub(crate) fn is_empty_input(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn input_length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

thread_local! {
    static REQUIRED: ValidatorFn = ValidatorFn::new(|control| {
        is_empty_input(&control.value()).then(|| error("required", Value::Bool(true)))
    });
    static REQUIRED_TRUE: ValidatorFn = ValidatorFn::new(|control| {
        (control.value() != Value::Bool(true)).then(|| error("required", Value::Bool(true)))
    });
    static NULL_VALIDATOR: ValidatorFn = ValidatorFn::new(|_| None);
}

/// Built-in validators.
pub struct Validators;

impl Validators {
    /// Fails with `{"required": true}` on an empty value.
    pub fn required() -> ValidatorFn {
        REQUIRED.with(Clone::clone)
    }

    /// Fails unless the value is `true`.
    pub fn required_true() -> ValidatorFn {
        REQUIRED_TRUE.with(Clone::clone)
    }

    pub fn null_validator() -> ValidatorFn {
        NULL_VALIDATOR.with(Clone::clone)
    }

    pub fn min(min: f64) -> ValidatorFn {
        ValidatorFn::new(move |control| {
            let value = control.value();
            if is_empty_input(&value) {
                return None;
            }
            let actual = numeric(&value)?;
            (actual < min).then(|| error("min", json!({ "min": min, "actual": value })))
        })
    }

    pub fn max(max: f64) -> ValidatorFn {
        ValidatorFn::new(move |control| {
            let value = control.value();
            if is_empty_input(&value) {
                return None;
            }
            let actual = numeric(&value)?;
            (actual > max).then(|| error("max", json!({ "max": max, "actual": value })))
        })
    }

    /// Empty values pass; use together with [`Validators::required`].
    pub fn min_length(required: usize) -> ValidatorFn {
        ValidatorFn::new(move |control| {
            let value = control.value();
            if is_empty_input(&value) {
                return None;
            }
            let actual = input_length(&value)?;
            (actual < required).then(|| {
                error(
                    "minlength",
                    json!({ "requiredLength": required, "actualLength": actual }),
                )
            })
        })
    }

    pub fn max_length(required: usize) -> ValidatorFn {
        ValidatorFn::new(move |control| {
            let actual = input_length(&control.value())?;
            (actual > required).then(|| {
                error(
                    "maxlength",
                    json!({ "requiredLength": required, "actualLength": actual }),
                )
            })
        })
    }

    /// Run every validator and merge their errors. `None` for an empty list.
    pub fn compose(validators: Vec<ValidatorFn>) -> Option<ValidatorFn> {
        if validators.is_empty() {
            return None;
        }
        Some(ValidatorFn::new(move |control| {
            validators
                .iter()
                .fold(None, |acc, v| merge_errors(acc, v.validate(control)))
        }))
    }
}
