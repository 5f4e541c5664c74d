//! Auto-tracking value proxy
//!
//! A [`ValueProxy`] reads a group's live value one field at a time. Every
//! read goes through the group's [`DependencyTracker`], so a computation
//! that reads `a` and `d` depends on exactly those two fields. Nested groups
//! get their own proxy, cached in a memo keyed by the nested group instance
//! and rebuilt only when that instance is swapped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::trace;

use super::tracker::{DependencyTracker, TrackerOptions};
use crate::forms::{ControlKind, FormGroup};
use crate::reactive::{untracked, Debouncer, Memo, ReadSignal, Scope};

#[derive(Clone)]
pub struct ValueProxy {
    inner: Rc<ProxyInner>,
}

struct ProxyInner {
    tracker: DependencyTracker,
    scope: Scope,
    nested: RefCell<HashMap<String, ReadSignal<Option<ValueProxy>>>>,
}

impl ValueProxy {
    /// A proxy over `group`. Its subscriptions live in a child of `scope`.
    ///
    /// A `debounce` window without an explicit `debouncer` gets a fresh
    /// shared debouncer so that nested proxies batch with this one.
    pub fn new(group: &FormGroup, scope: &Scope, mut options: TrackerOptions) -> Self {
        if options.debouncer.is_none() {
            if let Some(window) = options.debounce {
                options.debouncer = Some(Debouncer::new(window));
            }
        }
        let scope = scope.child();
        Self {
            inner: Rc::new(ProxyInner {
                tracker: DependencyTracker::new(group, &scope, options),
                scope,
                nested: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn group(&self) -> &FormGroup {
        self.inner.tracker.group()
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.inner.tracker
    }

    /// Tracked read of one field.
    ///
    /// Leaf and array fields return the live control value; nested groups
    /// return the value assembled by their own proxy. A missing field
    /// returns `None` and depends on the key list, so the caller reruns once
    /// the field appears.
    pub fn get(&self, name: &str) -> Option<Value> {
        let control = self.group().get_control(name);
        if control.as_ref().is_some_and(|c| c.kind() == ControlKind::Group) {
            return self.nested(name).map(|proxy| proxy.to_value());
        }
        let Some(cell) = self.inner.tracker.get_or_create_cell(name) else {
            self.keys();
            return None;
        };
        let cached = cell.get();
        self.inner.tracker.notify_track(name);
        match control {
            Some(control) => Some(control.value()),
            None => Some(cached),
        }
    }

    /// The proxy of the nested group `name`, if that field is a group.
    pub fn nested(&self, name: &str) -> Option<ValueProxy> {
        self.nested_signal(name).get()
    }

    /// Cell holding the nested proxy for `name`. The proxy is replaced, and
    /// the previous one disposed, when the nested group instance changes.
    pub fn nested_signal(&self, name: &str) -> ReadSignal<Option<ValueProxy>> {
        if let Some(signal) = self.inner.nested.borrow().get(name) {
            return signal.clone();
        }
        let signal = self.create_nested_signal(name);
        self.inner
            .nested
            .borrow_mut()
            .insert(name.to_string(), signal.clone());
        signal
    }

    fn create_nested_signal(&self, name: &str) -> ReadSignal<Option<ValueProxy>> {
        let tracker = self.inner.tracker.clone();
        let scope = self.inner.scope.clone();
        let options = self.nested_options(name);
        let name = name.to_string();
        Memo::with_previous(move |previous: Option<&Option<ValueProxy>>| {
            let entries = tracker.control_entries().get();
            let previous = previous.and_then(Option::as_ref);
            let group = entries
                .iter()
                .find(|(field, _)| *field == name)
                .and_then(|_| tracker.group().get_control(&name))
                .and_then(|control| FormGroup::try_from(control).ok());
            match (previous, group) {
                (Some(proxy), Some(group)) if proxy.group().ptr_eq(&group) => Some(proxy.clone()),
                (previous, group) => {
                    if let Some(stale) = previous {
                        trace!(field = %name, "nested group swapped, disposing proxy");
                        stale.dispose();
                    }
                    group.map(|group| untracked(|| ValueProxy::new(&group, &scope, options.clone())))
                }
            }
        })
        .read_only()
    }

    fn nested_options(&self, name: &str) -> TrackerOptions {
        let mut options = self.inner.tracker.options().clone();
        if let Some(parent) = options.on_track.take() {
            let prefix = name.to_string();
            options.on_track = Some(Rc::new(move |field: &str| {
                parent(&format!("{prefix}.{field}"));
            }));
        }
        options
    }

    /// Tracked read of a dot path such as `"address.city"`.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop()?;
        let mut proxy = self.clone();
        for segment in segments {
            proxy = proxy.nested(segment)?;
        }
        proxy.get(last)
    }

    /// Tracked list of every field name, soft-removed fields included.
    pub fn keys(&self) -> Vec<String> {
        self.inner.tracker.field_set_cell().get()
    }

    /// Tracked list of the names of enabled fields.
    pub fn enabled_keys(&self) -> Vec<String> {
        let group = self.group();
        self.keys()
            .into_iter()
            .filter(|name| group.get_control(name).is_some_and(|c| c.enabled()))
            .collect()
    }

    /// Tracked read of every field.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for name in self.keys() {
            if let Some(value) = self.get(&name) {
                map.insert(name, value);
            }
        }
        Value::Object(map)
    }

    /// Tear down every subscription this proxy and its nested proxies made.
    pub fn dispose(&self) {
        self.inner.scope.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.scope.is_disposed()
    }
}

impl PartialEq for ValueProxy {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ValueProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueProxy")
            .field("group", &self.group().id())
            .field("tracked", &self.inner.tracker.tracked_fields())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::FormControl;
    use crate::reactive::{Effect, Runtime};
    use serde_json::json;
    use std::time::Duration;

    fn proxy_over(value: Value) -> (FormGroup, ValueProxy) {
        let group = FormGroup::from_value(&value);
        let proxy = ValueProxy::new(&group, &Scope::new(), TrackerOptions::new());
        (group, proxy)
    }

    #[test]
    fn only_read_fields_get_cells() {
        let (_group, proxy) = proxy_over(json!({"a": 1, "b": 2, "c": 3}));
        assert_eq!(proxy.get("a"), Some(json!(1)));
        assert_eq!(proxy.tracker().tracked_fields(), vec!["a"]);
        assert_eq!(proxy.get("missing"), None);
    }

    #[test]
    fn effect_reruns_for_read_fields_only() {
        let (group, proxy) = proxy_over(json!({"a": 1, "b": 2}));
        let p = proxy.clone();
        let effect = Effect::new(move || {
            p.get("a");
        });

        group.get("b").unwrap().set_value(json!(20));
        Runtime::flush();
        assert_eq!(effect.run_count(), 1);

        group.get("a").unwrap().set_value(json!(10));
        Runtime::flush();
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn missing_field_read_waits_for_the_field() {
        let (group, proxy) = proxy_over(json!({"a": 1}));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (p, s) = (proxy.clone(), seen.clone());
        let _effect = Effect::new(move || s.borrow_mut().push(p.get("b")));

        group.add_control("b", FormControl::new(json!("late")));
        Runtime::flush();
        assert_eq!(*seen.borrow(), vec![None, Some(json!("late"))]);
    }

    #[test]
    fn nested_reads_are_tracked_and_prefixed() {
        let group = FormGroup::from_value(&json!({"address": {"city": "Rome", "zip": "00100"}}));
        let reads = Rc::new(RefCell::new(Vec::new()));
        let r = reads.clone();
        let proxy = ValueProxy::new(
            &group,
            &Scope::new(),
            TrackerOptions::new().on_track(move |name| r.borrow_mut().push(name.to_string())),
        );

        assert_eq!(proxy.get_path("address.city"), Some(json!("Rome")));
        assert_eq!(*reads.borrow(), vec!["address.city"]);

        let p = proxy.clone();
        let effect = Effect::new(move || {
            p.get_path("address.city");
        });
        group.get("address.zip").unwrap().set_value(json!("00200"));
        Runtime::flush();
        assert_eq!(effect.run_count(), 1);
        group.get("address.city").unwrap().set_value(json!("Milan"));
        Runtime::flush();
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn swapping_a_nested_group_rebuilds_its_proxy() {
        let (group, proxy) = proxy_over(json!({"address": {"city": "Rome"}}));
        let first = proxy.nested("address").unwrap();
        assert_eq!(proxy.nested("address").unwrap(), first);

        group.set_control("address", FormGroup::from_value(&json!({"city": "Paris"})));
        let second = proxy.nested("address").unwrap();
        assert_ne!(second, first);
        assert!(first.is_disposed());
        assert_eq!(proxy.get("address"), Some(json!({"city": "Paris"})));

        group.set_control("address", FormControl::new(json!("flat")));
        assert!(proxy.nested("address").is_none());
        assert!(second.is_disposed());
    }

    #[test]
    fn keys_and_enabled_keys() {
        let (group, proxy) = proxy_over(json!({"a": 1, "b": 2}));
        group.get("b").unwrap().disable();
        assert_eq!(proxy.keys(), vec!["a", "b"]);
        assert_eq!(proxy.enabled_keys(), vec!["a"]);
        assert_eq!(proxy.to_value(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn debounced_proxy_shares_its_window_with_nested_proxies() {
        let group = FormGroup::from_value(&json!({"a": 1, "n": {"b": 2}}));
        let proxy = ValueProxy::new(
            &group,
            &Scope::new(),
            TrackerOptions::new().debounce(Duration::from_millis(10)),
        );
        let p = proxy.clone();
        let effect = Effect::new(move || {
            p.get("a");
            p.get_path("n.b");
        });

        group.get("a").unwrap().set_value(json!(5));
        Runtime::advance_by(Duration::from_millis(5));
        group.get("n.b").unwrap().set_value(json!(6));
        Runtime::advance_by(Duration::from_millis(10));
        assert_eq!(effect.run_count(), 2);
        assert_eq!(proxy.to_value(), json!({"a": 5, "n": {"b": 6}}));
    }
}
