//! Forms Model
//!
//! Controls, groups and arrays with validators, status tracking and event
//! streams. The reactive layers above read and drive forms only through the
//! API exported here.

mod control;
mod group;
pub mod validators;

pub use control::{
    AbstractControl, ControlEvent, ControlId, ControlKind, ControlOptions, ControlStatus,
    UpdateOn, UpdateOptions, WeakControl,
};
pub use group::{FormArray, FormControl, FormGroup};
pub use validators::{merge_errors, AsyncValidatorFn, ValidationErrors, ValidatorFn, Validators};
