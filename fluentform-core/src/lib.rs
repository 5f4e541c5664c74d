//! FluentForm Core
//!
//! Signal-driven reactive forms. This crate provides:
//!
//! - Reactive primitives (signals, memos, effects, scopes) and an adapter
//!   from push streams to lazily connected cells
//! - Per-field dependency tracking over a form group
//! - Conditional, dependent and multi-field validators that follow the
//!   values they read
//! - A fluent form-group builder and a control-value-accessor bridge
//!
//! # Architecture
//!
//! - `reactive`: signals, memos, effects, streams and the thread-local runtime
//! - `graph`: dependency graph and scheduler behind the runtime
//! - `forms`: form controls, groups, arrays and validators
//! - `tracking`: per-field cells and the auto-tracking value proxy
//! - `validation`: the validator engine
//! - `builder`: form definitions and the extended form group
//! - `accessor`: exposes a component's control to a parent form
//!
//! # Example
//!
//! ```rust,ignore
//! use fluentform_core::builder::{BuildConfig, FormBuilder, FormGroupDefinition, ValidationRule};
//! use fluentform_core::forms::Validators;
//! use fluentform_core::reactive::{Runtime, Scope};
//! use fluentform_core::validation::Validation;
//! use serde_json::json;
//!
//! let scope = Scope::new();
//! let form = FormBuilder::new(&scope)
//!     .build(
//!         FormGroupDefinition::Value(json!({"contact": false, "email": ""})),
//!         BuildConfig::default(),
//!     )?
//!     .with_validation([(
//!         "email",
//!         vec![ValidationRule::conditional(|form| {
//!             Validation::when(form.get("contact") == Some(json!(true)), Validators::required())
//!         })],
//!     )])?;
//!
//! form.get("contact").unwrap().set_value(json!(true));
//! Runtime::flush();
//! // email is now required
//! ```

pub mod accessor;
pub mod builder;
pub mod error;
pub mod forms;
pub mod graph;
pub mod reactive;
pub mod tracking;
pub mod validation;

pub use builder::{BuildConfig, ExtendedFormGroup, FormBuilder, FormGroupDefinition};
pub use error::{ComputeFailure, FormsError, NotReady, Result};
pub use forms::{AbstractControl, FormArray, FormControl, FormGroup, Validators};
pub use reactive::{Effect, Memo, ReadSignal, Runtime, Scope, Signal};
pub use validation::{Validation, ValidatorEngine};
