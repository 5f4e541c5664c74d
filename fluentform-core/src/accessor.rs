//! Control-value-accessor bridge
//!
//! A component that owns a form control of its own can be bound by a
//! parent form like any other input. [`AccessorBridge`] wraps the component
//! (an [`AccessorHost`]) and speaks the parent's binding protocol:
//! [`ControlValueAccessor`] for values, touch and disabled state, and
//! [`ControlValidator`] for reporting the inner control's errors.
//!
//! The inner control may be fixed or come from a signal. In the latter case
//! every registered callback follows the signal, dropping its subscription
//! to the old control before subscribing to the new one.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace};

use crate::builder::ExtendedFormGroup;
use crate::forms::{
    merge_errors, AbstractControl, ControlEvent, FormArray, FormControl, FormGroup, ValidationErrors,
};
use crate::reactive::{untracked, Effect, ReadSignal, Scope, Subscription};

pub type ChangeFn = Rc<dyn Fn(Value)>;
pub type TouchedFn = Rc<dyn Fn()>;
pub type ValidatorChangeFn = Rc<dyn Fn()>;

/// Value side of the binding protocol.
pub trait ControlValueAccessor {
    /// The parent form writes a value into the component.
    fn write_value(&self, value: Value);
    /// `on_change` receives values edited inside the component.
    fn register_on_change(&self, on_change: ChangeFn);
    fn register_on_touched(&self, on_touched: TouchedFn);
    fn set_disabled_state(&self, disabled: bool);
}

/// Validation side of the binding protocol.
pub trait ControlValidator {
    /// Errors to report on the parent's `control`, `None` when valid.
    fn validate(&self, control: &AbstractControl) -> Option<ValidationErrors>;
    fn register_on_validator_change(&self, on_change: ValidatorChangeFn);
}

/// Where the bridge finds the component's control.
#[derive(Clone)]
pub enum ControlSource {
    Fixed(AbstractControl),
    Dynamic(ReadSignal<Option<AbstractControl>>),
}

impl ControlSource {
    fn current(&self) -> Option<AbstractControl> {
        match self {
            ControlSource::Fixed(control) => Some(control.clone()),
            ControlSource::Dynamic(signal) => signal.get(),
        }
    }
}

impl From<AbstractControl> for ControlSource {
    fn from(control: AbstractControl) -> Self {
        ControlSource::Fixed(control)
    }
}

impl From<FormControl> for ControlSource {
    fn from(control: FormControl) -> Self {
        ControlSource::Fixed(control.into())
    }
}

impl From<FormGroup> for ControlSource {
    fn from(group: FormGroup) -> Self {
        ControlSource::Fixed(group.into())
    }
}

impl From<FormArray> for ControlSource {
    fn from(array: FormArray) -> Self {
        ControlSource::Fixed(array.into())
    }
}

impl From<&ExtendedFormGroup> for ControlSource {
    fn from(form: &ExtendedFormGroup) -> Self {
        ControlSource::Fixed(form.group().clone().into())
    }
}

impl From<ReadSignal<Option<AbstractControl>>> for ControlSource {
    fn from(signal: ReadSignal<Option<AbstractControl>>) -> Self {
        ControlSource::Dynamic(signal)
    }
}

/// Result of an optional host override.
#[derive(Debug, Clone, PartialEq)]
pub enum Hook<T = ()> {
    Handled(T),
    /// Fall back to the bridge's own behaviour.
    Unhandled,
}

/// A component exposing its control through an [`AccessorBridge`].
///
/// Only [`AccessorHost::form_control`] is required. Every other method is an
/// override point that defaults to the bridge's native behaviour.
pub trait AccessorHost: 'static {
    fn form_control(&self) -> ControlSource;

    fn write_value(&self, _value: &Value) -> Hook {
        Hook::Unhandled
    }

    fn register_on_touched(&self, _on_touched: &TouchedFn) -> Hook {
        Hook::Unhandled
    }

    fn set_disabled_state(&self, _disabled: bool) -> Hook {
        Hook::Unhandled
    }

    fn validate(&self, _control: &AbstractControl) -> Hook<Option<ValidationErrors>> {
        Hook::Unhandled
    }

    /// Whether the control edits a subset of a larger entity. When it does,
    /// values sent to `on_change` are merged into the entity first.
    fn exposes_entity(&self) -> bool {
        false
    }

    /// The current entity; the last written value is used when `None`.
    fn entity(&self) -> Option<Value> {
        None
    }
}

pub struct AccessorBridge<H: AccessorHost> {
    inner: Rc<BridgeInner<H>>,
}

struct BridgeInner<H> {
    host: H,
    source: ControlSource,
    scope: Scope,
    entity: RefCell<Option<Value>>,
}

impl<H: AccessorHost> AccessorBridge<H> {
    /// Subscriptions made by the bridge live in a child of `scope`.
    pub fn new(host: H, scope: &Scope) -> Self {
        let source = host.form_control();
        Self {
            inner: Rc::new(BridgeInner {
                host,
                source,
                scope: scope.child(),
                entity: RefCell::new(None),
            }),
        }
    }

    pub fn host(&self) -> &H {
        &self.inner.host
    }

    /// The control currently bound. Tracked when the source is a signal.
    pub fn control(&self) -> Option<AbstractControl> {
        self.inner.source.current()
    }

    /// Last value passed to [`ControlValueAccessor::write_value`].
    pub fn last_entity(&self) -> Option<Value> {
        self.inner.entity.borrow().clone()
    }

    pub fn dispose(&self) {
        self.inner.scope.dispose();
    }

    fn current_control(&self) -> Option<AbstractControl> {
        untracked(|| self.inner.source.current())
    }

    /// Keep one subscription made by `connect` on whichever control the
    /// source currently resolves to.
    fn follow(&self, what: &'static str, connect: impl Fn(&AbstractControl) -> Subscription + 'static) {
        let source = self.inner.source.clone();
        let current: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let held = current.clone();
        let effect = Effect::new(move || {
            let control = source.current();
            let previous = held.borrow_mut().take();
            if let Some(previous) = previous {
                trace!(what, "dropping subscription to previous control");
                previous.unsubscribe();
            }
            if let Some(control) = control {
                let subscription = untracked(|| connect(&control));
                *held.borrow_mut() = Some(subscription);
            }
        });
        self.inner.scope.add_effect(effect);
        self.inner.scope.on_dispose(move || {
            if let Some(subscription) = current.borrow_mut().take() {
                subscription.unsubscribe();
            }
        });
    }
}

impl<H> BridgeInner<H>
where
    H: AccessorHost,
{
    fn merge_entity(&self, value: Value) -> Value {
        if !self.host.exposes_entity() {
            return value;
        }
        let base = self.host.entity().or_else(|| self.entity.borrow().clone());
        match (base, value) {
            (Some(Value::Object(mut entity)), Value::Object(partial)) => {
                entity.extend(partial);
                Value::Object(entity)
            }
            (_, value) => value,
        }
    }
}

impl<H: AccessorHost> ControlValueAccessor for AccessorBridge<H> {
    fn write_value(&self, value: Value) {
        *self.inner.entity.borrow_mut() = Some(value.clone());
        if let Hook::Handled(()) = self.inner.host.write_value(&value) {
            return;
        }
        match self.current_control() {
            Some(control) => control.reset_to(value),
            None => debug!("no control bound, dropping written value"),
        }
    }

    /// Values reach `on_change` one tick after the edit, and only while the
    /// control is dirty, so writes coming from the parent are not echoed.
    fn register_on_change(&self, on_change: ChangeFn) {
        let bridge: Weak<BridgeInner<H>> = Rc::downgrade(&self.inner);
        self.follow("value", move |control| {
            let dirty = control.clone();
            let bridge = bridge.clone();
            let on_change = on_change.clone();
            control
                .value_changes()
                .filter(move |_| dirty.dirty())
                .debounce(Duration::ZERO)
                .subscribe(move |value| {
                    if let Some(inner) = bridge.upgrade() {
                        on_change(inner.merge_entity(value));
                    }
                })
        });
    }

    fn register_on_touched(&self, on_touched: TouchedFn) {
        if let Hook::Handled(()) = self.inner.host.register_on_touched(&on_touched) {
            return;
        }
        self.follow("touched", move |control| {
            let on_touched = on_touched.clone();
            control
                .events()
                .filter_map(|event| match event {
                    ControlEvent::Touched(true) => Some(()),
                    _ => None,
                })
                .subscribe(move |()| on_touched())
        });
    }

    fn set_disabled_state(&self, disabled: bool) {
        if let Hook::Handled(()) = self.inner.host.set_disabled_state(disabled) {
            return;
        }
        let Some(control) = self.current_control() else {
            return;
        };
        if disabled {
            control.disable();
        } else {
            control.enable();
        }
    }
}

impl<H: AccessorHost> ControlValidator for AccessorBridge<H> {
    /// The inner control's own errors merged with those of its direct
    /// children; children win on a shared key.
    fn validate(&self, control: &AbstractControl) -> Option<ValidationErrors> {
        if let Hook::Handled(errors) = self.inner.host.validate(control) {
            return errors;
        }
        let inner = self.current_control()?;
        if inner.valid() {
            return None;
        }
        inner
            .children()
            .iter()
            .fold(inner.errors(), |errors, child| merge_errors(errors, child.errors()))
    }

    /// `on_change` runs whenever the inner control's status changes, and
    /// when a dynamic source swaps to another control.
    fn register_on_validator_change(&self, on_change: ValidatorChangeFn) {
        let connected = Rc::new(Cell::new(false));
        self.follow("status", move |control| {
            if connected.replace(true) {
                on_change();
            }
            let last = Cell::new(control.status());
            let on_change = on_change.clone();
            control.status_changes().subscribe(move |status| {
                if last.replace(status) != status {
                    on_change();
                }
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{ControlOptions, ControlStatus, Validators};
    use crate::reactive::{Runtime, Signal};
    use serde_json::json;

    struct Profile {
        form: FormGroup,
    }

    impl AccessorHost for Profile {
        fn form_control(&self) -> ControlSource {
            self.form.clone().into()
        }
    }

    fn profile() -> (FormGroup, AccessorBridge<Profile>) {
        let form = FormGroup::new([
            (
                "name",
                FormControl::with_options(json!(""), ControlOptions::new().validator(Validators::required()))
                    .into(),
            ),
            (
                "age",
                FormControl::with_options(json!(30), ControlOptions::new().validator(Validators::min(18.0)))
                    .into(),
            ),
        ]);
        let bridge = AccessorBridge::new(Profile { form: form.clone() }, &Scope::new());
        (form, bridge)
    }

    fn recorder() -> (Rc<RefCell<Vec<Value>>>, ChangeFn) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        (seen, Rc::new(move |value| s.borrow_mut().push(value)))
    }

    #[test]
    fn writes_are_not_echoed_and_edits_arrive_a_tick_later() {
        let (form, bridge) = profile();
        let (seen, on_change) = recorder();
        bridge.register_on_change(on_change);

        bridge.write_value(json!({"name": "Lara", "age": 32}));
        Runtime::tick();
        assert_eq!(form.value(), json!({"name": "Lara", "age": 32}));
        assert!(seen.borrow().is_empty());

        form.get("name").unwrap().set_value_from_user(json!("Indy"));
        assert!(seen.borrow().is_empty());
        Runtime::tick();
        assert_eq!(*seen.borrow(), vec![json!({"name": "Indy", "age": 32})]);
    }

    #[test]
    fn partial_values_merge_into_the_entity() {
        struct Editor {
            form: FormGroup,
        }
        impl AccessorHost for Editor {
            fn form_control(&self) -> ControlSource {
                self.form.clone().into()
            }
            fn exposes_entity(&self) -> bool {
                true
            }
        }

        let form = FormGroup::from_value(&json!({"name": ""}));
        let bridge = AccessorBridge::new(Editor { form: form.clone() }, &Scope::new());
        let (seen, on_change) = recorder();
        bridge.register_on_change(on_change);

        bridge.write_value(json!({"id": 7, "name": "Lara"}));
        assert_eq!(bridge.last_entity(), Some(json!({"id": 7, "name": "Lara"})));
        form.get("name").unwrap().set_value_from_user(json!("Indy"));
        Runtime::tick();
        assert_eq!(*seen.borrow(), vec![json!({"id": 7, "name": "Indy"})]);
    }

    #[test]
    fn validate_merges_child_errors() {
        let (form, bridge) = profile();
        form.get("age").unwrap().set_value(json!(12));
        let errors = bridge.validate(&form).unwrap();
        assert!(errors.contains_key("required"));
        assert!(errors.contains_key("min"));

        form.patch_value(json!({"name": "Lara", "age": 40}));
        assert_eq!(bridge.validate(&form), None);
    }

    #[test]
    fn touched_disabled_and_validator_change() {
        let (form, bridge) = profile();
        let touched = Rc::new(Cell::new(0));
        let t = touched.clone();
        bridge.register_on_touched(Rc::new(move || t.set(t.get() + 1)));
        let changes = Rc::new(Cell::new(0));
        let c = changes.clone();
        bridge.register_on_validator_change(Rc::new(move || c.set(c.get() + 1)));

        form.get("name").unwrap().mark_as_touched();
        assert_eq!(touched.get(), 1);

        assert_eq!(form.status(), ControlStatus::Invalid);
        form.get("name").unwrap().set_value(json!("Lara"));
        form.get("name").unwrap().set_value(json!("Indy"));
        assert_eq!(changes.get(), 1);

        bridge.set_disabled_state(true);
        assert!(form.disabled());
        assert_eq!(changes.get(), 2);
        bridge.set_disabled_state(false);
        assert!(form.enabled());
    }

    #[test]
    fn overrides_take_precedence() {
        struct Custom {
            form: FormGroup,
            written: RefCell<Vec<Value>>,
        }
        impl AccessorHost for Custom {
            fn form_control(&self) -> ControlSource {
                self.form.clone().into()
            }
            fn write_value(&self, value: &Value) -> Hook {
                self.written.borrow_mut().push(value.clone());
                Hook::Handled(())
            }
            fn set_disabled_state(&self, _disabled: bool) -> Hook {
                Hook::Handled(())
            }
            fn validate(&self, _control: &AbstractControl) -> Hook<Option<ValidationErrors>> {
                Hook::Handled(None)
            }
        }

        let form = FormGroup::new([(
            "name",
            FormControl::with_options(json!(""), ControlOptions::new().validator(Validators::required())).into(),
        )]);
        let bridge = AccessorBridge::new(
            Custom {
                form: form.clone(),
                written: RefCell::new(Vec::new()),
            },
            &Scope::new(),
        );
        bridge.write_value(json!({"name": "Lara"}));
        bridge.set_disabled_state(true);
        assert_eq!(form.value(), json!({"name": ""}));
        assert!(form.enabled());
        assert_eq!(bridge.validate(&form), None);
        assert_eq!(*bridge.host().written.borrow(), vec![json!({"name": "Lara"})]);
    }

    #[test]
    fn dynamic_sources_swap_subscriptions() {
        struct Switching {
            control: ReadSignal<Option<AbstractControl>>,
        }
        impl AccessorHost for Switching {
            fn form_control(&self) -> ControlSource {
                self.control.clone().into()
            }
        }

        let a: AbstractControl = FormControl::new(json!("a")).into();
        let b: AbstractControl = FormControl::new(json!("b")).into();
        let current = Signal::new(None);
        let bridge = AccessorBridge::new(Switching { control: current.read_only() }, &Scope::new());
        let (seen, on_change) = recorder();
        bridge.register_on_change(on_change);

        current.set(Some(a.clone()));
        Runtime::flush();
        a.set_value_from_user(json!("a1"));
        Runtime::tick();

        current.set(Some(b.clone()));
        Runtime::flush();
        a.set_value_from_user(json!("a2"));
        b.set_value_from_user(json!("b1"));
        Runtime::tick();
        assert_eq!(*seen.borrow(), vec![json!("a1"), json!("b1")]);

        bridge.dispose();
        b.set_value_from_user(json!("b2"));
        Runtime::tick();
        assert_eq!(seen.borrow().len(), 2);
    }
}
