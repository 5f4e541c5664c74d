//! Typed wrappers over [`AbstractControl`].

use std::ops::Deref;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use super::control::{AbstractControl, ControlKind, ControlOptions, UpdateOptions};

macro_rules! control_wrapper {
    ($name:ident, $kind:expr) => {
        impl Deref for $name {
            type Target = AbstractControl;

            fn deref(&self) -> &AbstractControl {
                &self.0
            }
        }

        impl From<$name> for AbstractControl {
            fn from(wrapper: $name) -> Self {
                wrapper.0
            }
        }

        impl TryFrom<AbstractControl> for $name {
            type Error = AbstractControl;

            fn try_from(control: AbstractControl) -> Result<Self, Self::Error> {
                if control.kind() == $kind {
                    Ok(Self(control))
                } else {
                    Err(control)
                }
            }
        }

        impl $name {
            pub fn control(&self) -> &AbstractControl {
                &self.0
            }
        }
    };
}

/// A leaf control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormControl(AbstractControl);

control_wrapper!(FormControl, ControlKind::Control);

impl FormControl {
    pub fn new(value: Value) -> Self {
        Self::with_options(value, ControlOptions::default())
    }

    pub fn with_options(value: Value, options: ControlOptions) -> Self {
        Self(AbstractControl::leaf(value, &options))
    }
}

/// A control with named children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormGroup(AbstractControl);

control_wrapper!(FormGroup, ControlKind::Group);

impl FormGroup {
    pub fn new<K: Into<String>>(controls: impl IntoIterator<Item = (K, AbstractControl)>) -> Self {
        Self::with_options(controls, ControlOptions::default())
    }

    pub fn with_options<K: Into<String>>(
        controls: impl IntoIterator<Item = (K, AbstractControl)>,
        options: ControlOptions,
    ) -> Self {
        let controls: IndexMap<String, AbstractControl> =
            controls.into_iter().map(|(k, c)| (k.into(), c)).collect();
        Self(AbstractControl::group(controls, &options))
    }

    /// Build a group of leaf controls (and nested groups for nested
    /// objects) from a JSON object. Non-object values give an empty group.
    pub fn from_value(value: &Value) -> Self {
        let controls = value
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(name, v)| {
                        let control: AbstractControl = match v {
                            Value::Object(_) => FormGroup::from_value(v).into(),
                            _ => FormControl::new(v.clone()).into(),
                        };
                        (name.clone(), control)
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Self::new(controls)
    }

    pub fn controls(&self) -> IndexMap<String, AbstractControl> {
        self.named_children().into_iter().collect()
    }

    /// Names of all children, enabled or not, in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.named_children().into_iter().map(|(name, _)| name).collect()
    }

    pub fn get_control(&self, name: &str) -> Option<AbstractControl> {
        self.child(name)
    }

    /// Whether an enabled child named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.child(name).is_some_and(|c| c.enabled())
    }

    pub fn has_control(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    /// Add a child. An existing child with the same name is kept and the
    /// call does nothing.
    pub fn add_control(&self, name: impl Into<String>, control: impl Into<AbstractControl>) {
        self.add_control_with(name, control, UpdateOptions::default());
    }

    pub fn add_control_with(
        &self,
        name: impl Into<String>,
        control: impl Into<AbstractControl>,
        options: UpdateOptions,
    ) {
        let name = name.into();
        let control = control.into();
        let added = self
            .with_group_controls(|controls| {
                if controls.contains_key(&name) {
                    false
                } else {
                    controls.insert(name.clone(), control.clone());
                    true
                }
            })
            .unwrap_or(false);
        if added {
            debug!(group = self.id().raw(), field = %name, "control added");
            self.adopt(&control);
            self.structure_changed(options);
        }
    }

    pub fn remove_control(&self, name: &str) {
        self.remove_control_with(name, UpdateOptions::default());
    }

    pub fn remove_control_with(&self, name: &str, options: UpdateOptions) {
        let removed = self
            .with_group_controls(|controls| controls.shift_remove(name))
            .flatten();
        if let Some(control) = removed {
            debug!(group = self.id().raw(), field = %name, "control removed");
            AbstractControl::orphan(&control);
            self.structure_changed(options);
        }
    }

    /// Replace (or add) the child named `name`.
    pub fn set_control(&self, name: impl Into<String>, control: impl Into<AbstractControl>) {
        self.set_control_with(name, control, UpdateOptions::default());
    }

    pub fn set_control_with(
        &self,
        name: impl Into<String>,
        control: impl Into<AbstractControl>,
        options: UpdateOptions,
    ) {
        let name = name.into();
        let control = control.into();
        let previous = self
            .with_group_controls(|controls| controls.insert(name.clone(), control.clone()))
            .flatten();
        if let Some(previous) = previous {
            AbstractControl::orphan(&previous);
        }
        debug!(group = self.id().raw(), field = %name, "control set");
        self.adopt(&control);
        self.structure_changed(options);
    }
}

/// A control with indexed children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormArray(AbstractControl);

control_wrapper!(FormArray, ControlKind::Array);

impl FormArray {
    pub fn new(controls: impl IntoIterator<Item = AbstractControl>) -> Self {
        Self::with_options(controls, ControlOptions::default())
    }

    pub fn with_options(
        controls: impl IntoIterator<Item = AbstractControl>,
        options: ControlOptions,
    ) -> Self {
        Self(AbstractControl::array(controls.into_iter().collect(), &options))
    }

    pub fn controls(&self) -> Vec<AbstractControl> {
        self.children()
    }

    pub fn at(&self, index: usize) -> Option<AbstractControl> {
        self.with_array_controls(|controls| controls.get(index).cloned())
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.with_array_controls(|controls| controls.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, control: impl Into<AbstractControl>) {
        let control = control.into();
        self.with_array_controls(|controls| controls.push(control.clone()));
        self.adopt(&control);
        self.structure_changed(UpdateOptions::default());
    }

    pub fn insert(&self, index: usize, control: impl Into<AbstractControl>) {
        let control = control.into();
        self.with_array_controls(|controls| {
            let index = index.min(controls.len());
            controls.insert(index, control.clone());
        });
        self.adopt(&control);
        self.structure_changed(UpdateOptions::default());
    }

    pub fn remove_at(&self, index: usize) {
        let removed = self
            .with_array_controls(|controls| (index < controls.len()).then(|| controls.remove(index)))
            .flatten();
        if let Some(control) = removed {
            AbstractControl::orphan(&control);
            self.structure_changed(UpdateOptions::default());
        }
    }

    pub fn clear(&self) {
        let removed = self
            .with_array_controls(std::mem::take)
            .unwrap_or_default();
        if removed.is_empty() {
            return;
        }
        for control in &removed {
            AbstractControl::orphan(control);
        }
        self.structure_changed(UpdateOptions::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{ControlEvent, Validators};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn add_and_remove_announce_structure_changes() {
        let group = FormGroup::from_value(&json!({"a": 1}));
        let changes = Rc::new(RefCell::new(0));
        let c = changes.clone();
        let _sub = group.events().subscribe(move |e| {
            if e == ControlEvent::ControlsChanged {
                *c.borrow_mut() += 1;
            }
        });

        group.add_control("b", FormControl::new(json!(2)));
        group.add_control("b", FormControl::new(json!(99)));
        assert_eq!(group.value(), json!({"a": 1, "b": 2}));

        group.remove_control("a");
        group.remove_control("missing");
        assert_eq!(group.keys(), vec!["b"]);
        assert_eq!(*changes.borrow(), 2);
    }

    #[test]
    fn set_control_replaces_and_revalidates() {
        let group = FormGroup::from_value(&json!({"a": "x"}));
        let old = group.get_control("a").unwrap();
        group.set_control(
            "a",
            FormControl::with_options(
                json!(""),
                ControlOptions::new().validator(Validators::required()),
            ),
        );
        assert!(old.parent().is_none());
        assert!(group.invalid());
        assert!(group.contains("a"));

        group.get_control("a").unwrap().disable();
        assert!(!group.contains("a"));
        assert!(group.has_control("a"));
    }

    #[test]
    fn nested_objects_become_groups() {
        let group = FormGroup::from_value(&json!({"address": {"city": "Rome"}, "tags": ["x"]}));
        let address = group.get_control("address").unwrap();
        assert!(FormGroup::try_from(address).is_ok());
        assert_eq!(group.get("tags").unwrap().value(), json!(["x"]));
    }

    #[test]
    fn array_operations() {
        let array = FormArray::new([FormControl::new(json!(1)).into()]);
        array.push(FormControl::new(json!(2)));
        array.insert(0, FormControl::new(json!(0)));
        assert_eq!(array.value(), json!([0, 1, 2]));
        assert_eq!(array.len(), 3);

        array.remove_at(1);
        array.remove_at(10);
        assert_eq!(array.value(), json!([0, 2]));
        assert_eq!(array.get("1").unwrap().value(), json!(2));

        array.clear();
        assert!(array.is_empty());
    }
}
