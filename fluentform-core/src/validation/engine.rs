//! Validator engine
//!
//! Runs validation computations inside effects and keeps, per computation
//! and target control, the validators that computation attached. Each run
//! diffs its new list against that record:
//!
//! - identical list (same length, same validator at every index): nothing
//! - otherwise: release the validators no longer wanted, take hold of the
//!   new ones, revalidate the control once if its list actually changed
//! - a control that stopped being a target is released from everything the
//!   computation held on it
//!
//! Holds are counted per control and validator across computations: a
//! validator leaves a control only when the last computation holding it
//! there lets go, and never when it was on the control before the engine
//! first attached it.
//!
//! `NotReady` and failed runs leave the record and the controls as they are.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::{smallvec, SmallVec};
use tracing::{debug, trace, warn};

use super::{same_list, Validation, ValidatorSlot};
use crate::forms::{AbstractControl, ControlId, ValidationErrors, WeakControl};
use crate::reactive::{untracked, Effect, Scope};

/// Identity of one registered validation computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputationId(u64);

impl ComputationId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Counters of the work the engine did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub attach_count: usize,
    pub detach_count: usize,
    pub revalidation_count: usize,
}

type BindingKey = (ComputationId, ControlId);

/// Validator slot kind, control and validator identity.
type HoldKey = (&'static str, ControlId, usize);

#[derive(Debug, Clone, Copy)]
struct Hold {
    count: usize,
    /// Already on the control when first held; never detached by the engine.
    foreign: bool,
}

struct Binding<V> {
    control: WeakControl,
    validators: SmallVec<[V; 2]>,
}

/// Work decided under the table borrow, carried out after it is released.
struct Change<V> {
    control: AbstractControl,
    detach: SmallVec<[V; 2]>,
    attach: SmallVec<[V; 2]>,
}

/// Owner of every validator binding made through it.
#[derive(Clone)]
pub struct ValidatorEngine {
    inner: Rc<EngineInner>,
}

struct EngineInner {
    scope: Scope,
    // Values are `Binding<V>` for the slot type of the computation.
    bindings: RefCell<HashMap<BindingKey, Box<dyn Any>>>,
    holds: RefCell<HashMap<HoldKey, Hold>>,
    next_id: Cell<u64>,
    stats: Cell<EngineStats>,
}

impl ValidatorEngine {
    /// Effects created by the engine live in a child of `scope`.
    pub fn new(scope: &Scope) -> Self {
        Self {
            inner: Rc::new(EngineInner {
                scope: scope.child(),
                bindings: RefCell::new(HashMap::new()),
                holds: RefCell::new(HashMap::new()),
                next_id: Cell::new(0),
                stats: Cell::new(EngineStats::default()),
            }),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn stats(&self) -> EngineStats {
        self.inner.stats.get()
    }

    pub fn attach_count(&self) -> usize {
        self.stats().attach_count
    }

    pub fn detach_count(&self) -> usize {
        self.stats().detach_count
    }

    pub fn revalidation_count(&self) -> usize {
        self.stats().revalidation_count
    }

    /// Number of (computation, control) bindings currently recorded.
    pub fn binding_count(&self) -> usize {
        self.inner.bindings.borrow().len()
    }

    /// Stop every computation. Attached validators stay on their controls.
    pub fn dispose(&self) {
        self.inner.scope.dispose();
    }

    fn next_id(&self) -> ComputationId {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        ComputationId(id)
    }

    /// Run `compute` in an effect owned by the engine and keep its targets
    /// carrying exactly the validators it returns.
    pub(crate) fn bind<V, F>(&self, compute: F) -> ComputationId
    where
        V: ValidatorSlot,
        F: Fn() -> (Vec<AbstractControl>, Validation<V>) + 'static,
    {
        let id = self.next_id();
        let engine: Weak<EngineInner> = Rc::downgrade(&self.inner);
        let errors_cache: RefCell<Option<(ValidationErrors, V)>> = RefCell::new(None);

        let effect = Effect::new(move || {
            let Some(inner) = engine.upgrade() else {
                return;
            };
            let (targets, validation) = compute();
            let validators: SmallVec<[V; 2]> = match validation {
                Validation::Clear => SmallVec::new(),
                Validation::Apply(list) => list,
                Validation::Errors(errors) => {
                    let mut cache = errors_cache.borrow_mut();
                    let reused = match &*cache {
                        Some((previous, validator)) if *previous == errors => Some(validator.clone()),
                        _ => None,
                    };
                    let validator = reused.unwrap_or_else(|| {
                        let validator = V::from_errors(errors.clone());
                        *cache = Some((errors, validator.clone()));
                        validator
                    });
                    smallvec![validator]
                }
                Validation::NotReady => {
                    trace!(computation = id.0, "validation input not ready, keeping bindings");
                    return;
                }
                Validation::Failed(message) => {
                    warn!(computation = id.0, error = %message, "validation computation failed, keeping bindings");
                    return;
                }
            };
            untracked(|| inner.apply(id, &targets, validators));
        });
        self.inner.scope.add_effect(effect);
        id
    }
}

impl EngineInner {
    fn apply<V: ValidatorSlot>(
        &self,
        id: ComputationId,
        targets: &[AbstractControl],
        validators: SmallVec<[V; 2]>,
    ) {
        let changes = self.diff(id, targets, &validators);
        if changes.is_empty() {
            return;
        }
        debug!(
            computation = id.0,
            kind = V::KIND,
            controls = changes.len(),
            validators = validators.len(),
            "validator bindings changed"
        );

        let mut stats = self.stats.get();
        let mut touched = Vec::new();
        for change in &changes {
            let control_id = change.control.id();
            let detach: SmallVec<[V; 2]> = change
                .detach
                .iter()
                .filter(|v| self.release(control_id, *v))
                .cloned()
                .collect();
            let attach: SmallVec<[V; 2]> = change
                .attach
                .iter()
                .filter(|v| self.acquire(&change.control, *v))
                .cloned()
                .collect();
            if !change.detach.is_empty() {
                stats.detach_count += 1;
            }
            if !change.attach.is_empty() {
                stats.attach_count += 1;
            }
            if !detach.is_empty() {
                V::detach(&change.control, &detach);
            }
            if !attach.is_empty() {
                V::attach(&change.control, &attach);
            }
            if !detach.is_empty() || !attach.is_empty() {
                touched.push(change.control.clone());
            } else {
                trace!(computation = id.0, control = control_id.raw(), "validators held elsewhere, list unchanged");
            }
        }
        self.stats.set(stats);

        for control in &touched {
            V::revalidate(control);
            let mut stats = self.stats.get();
            stats.revalidation_count += 1;
            self.stats.set(stats);
        }
    }

    /// Count one more hold of `validator` on `control`. True when the
    /// validator has to be added to the control.
    fn acquire<V: ValidatorSlot>(&self, control: &AbstractControl, validator: &V) -> bool {
        let mut holds = self.holds.borrow_mut();
        let hold = holds
            .entry((V::KIND, control.id(), validator.identity()))
            .or_insert_with(|| Hold {
                count: 0,
                foreign: V::attached(control).iter().any(|v| v.same(validator)),
            });
        hold.count += 1;
        hold.count == 1 && !hold.foreign
    }

    /// Drop one hold of `validator` on `control`. True when it was the last
    /// one and the validator has to leave the control.
    fn release<V: ValidatorSlot>(&self, control: ControlId, validator: &V) -> bool {
        let mut holds = self.holds.borrow_mut();
        let key = (V::KIND, control, validator.identity());
        let Some(hold) = holds.get_mut(&key) else {
            return false;
        };
        hold.count = hold.count.saturating_sub(1);
        if hold.count > 0 {
            return false;
        }
        let foreign = hold.foreign;
        holds.remove(&key);
        !foreign
    }

    fn diff<V: ValidatorSlot>(
        &self,
        id: ComputationId,
        targets: &[AbstractControl],
        validators: &[V],
    ) -> Vec<Change<V>> {
        let mut table = self.bindings.borrow_mut();
        let mut changes = Vec::new();

        let dropped: Vec<BindingKey> = table
            .keys()
            .filter(|(computation, control)| {
                *computation == id && !targets.iter().any(|t| t.id() == *control)
            })
            .copied()
            .collect();
        for key in dropped {
            let Some(binding) = table.remove(&key).and_then(|b| b.downcast::<Binding<V>>().ok())
            else {
                continue;
            };
            if let Some(control) = binding.control.upgrade() {
                changes.push(Change {
                    control,
                    detach: distinct(binding.validators.iter()),
                    attach: SmallVec::new(),
                });
            }
        }

        for target in targets {
            let key = (id, target.id());
            let previous: SmallVec<[V; 2]> = table
                .get(&key)
                .and_then(|b| b.downcast_ref::<Binding<V>>())
                .map(|b| b.validators.clone())
                .unwrap_or_default();
            if same_list(&previous, validators) {
                continue;
            }
            let detach = distinct(previous.iter().filter(|old| !validators.iter().any(|v| v.same(old))));
            let attach = distinct(validators.iter().filter(|new| !previous.iter().any(|p| p.same(new))));
            if validators.is_empty() {
                table.remove(&key);
            } else {
                table.insert(
                    key,
                    Box::new(Binding {
                        control: target.downgrade(),
                        validators: validators.iter().cloned().collect::<SmallVec<[V; 2]>>(),
                    }),
                );
            }
            changes.push(Change {
                control: target.clone(),
                detach,
                attach,
            });
        }
        changes
    }
}

/// Validators of `items` with repeats removed, first occurrence kept.
fn distinct<'a, V: ValidatorSlot>(items: impl Iterator<Item = &'a V>) -> SmallVec<[V; 2]> {
    let mut out: SmallVec<[V; 2]> = SmallVec::new();
    for item in items {
        if !out.iter().any(|v| v.same(item)) {
            out.push(item.clone());
        }
    }
    out
}

impl fmt::Debug for ValidatorEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorEngine")
            .field("bindings", &self.binding_count())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{FormControl, Validators, ValidatorFn};
    use crate::reactive::{Runtime, Signal};
    use serde_json::json;

    #[test]
    fn identical_results_do_nothing() {
        let engine = ValidatorEngine::new(&Scope::new());
        let control: AbstractControl = FormControl::new(json!("")).into();
        let tick = Signal::new(0);

        let (t, c) = (tick.clone(), control.clone());
        engine.bind(move || {
            t.get();
            (vec![c.clone()], Validation::apply(Validators::required()))
        });
        assert_eq!(engine.attach_count(), 1);
        assert!(control.has_error("required"));

        for i in 1..4 {
            tick.set(i);
            Runtime::flush();
        }
        assert_eq!(
            engine.stats(),
            EngineStats {
                attach_count: 1,
                detach_count: 0,
                revalidation_count: 1,
            }
        );
    }

    #[test]
    fn clear_detaches_and_revalidates() {
        let engine = ValidatorEngine::new(&Scope::new());
        let control: AbstractControl = FormControl::new(json!("")).into();
        let on = Signal::new(true);

        let (o, c) = (on.clone(), control.clone());
        engine.bind(move || (vec![c.clone()], Validation::when(o.get(), Validators::required())));
        assert!(control.invalid());

        on.set(false);
        Runtime::flush();
        assert!(control.valid());
        assert!(!control.has_validator(&Validators::required()));
        assert_eq!(engine.detach_count(), 1);
        assert_eq!(engine.binding_count(), 0);
    }

    #[test]
    fn errors_reuse_the_failing_validator_while_unchanged() {
        let engine = ValidatorEngine::new(&Scope::new());
        let control: AbstractControl = FormControl::new(json!(1)).into();
        let message = Signal::new("a");
        let tick = Signal::new(0);

        let (m, t, c) = (message.clone(), tick.clone(), control.clone());
        engine.bind::<ValidatorFn, _>(move || {
            t.get();
            let errors = crate::forms::validators::error("custom", json!(m.get()));
            (vec![c.clone()], Validation::Errors(errors))
        });
        let first = control.validators();
        tick.set(1);
        Runtime::flush();
        assert!(control.validators()[0].ptr_eq(&first[0]));
        assert_eq!(engine.attach_count(), 1);

        message.set("b");
        Runtime::flush();
        assert_eq!(control.validators().len(), 1);
        assert_eq!(control.get_error("custom"), Some(json!("b")));
        assert_eq!(engine.attach_count(), 2);
    }

    #[test]
    fn retargeting_moves_validators() {
        let engine = ValidatorEngine::new(&Scope::new());
        let a: AbstractControl = FormControl::new(json!("")).into();
        let b: AbstractControl = FormControl::new(json!("")).into();
        let use_b = Signal::new(false);

        let (u, a2, b2) = (use_b.clone(), a.clone(), b.clone());
        engine.bind(move || {
            let target = if u.get() { b2.clone() } else { a2.clone() };
            (vec![target], Validation::apply(Validators::required()))
        });
        assert!(a.invalid() && b.valid());

        use_b.set(true);
        Runtime::flush();
        assert!(a.valid() && b.invalid());
    }

    #[test]
    fn skipped_runs_keep_bindings() {
        let engine = ValidatorEngine::new(&Scope::new());
        let control: AbstractControl = FormControl::new(json!("")).into();
        let ready = Signal::new(true);

        let (r, c) = (ready.clone(), control.clone());
        engine.bind(move || {
            let validation = if r.get() {
                Validation::apply(Validators::required())
            } else {
                Validation::Failed("lookup failed".into())
            };
            (vec![c.clone()], validation)
        });
        ready.set(false);
        Runtime::flush();
        assert!(control.has_validator(&Validators::required()));
        assert_eq!(engine.detach_count(), 0);
    }

    #[test]
    fn shared_validator_stays_while_any_computation_holds_it() {
        let engine = ValidatorEngine::new(&Scope::new());
        let control: AbstractControl = FormControl::new(json!("")).into();
        let first = Signal::new(true);
        let second = Signal::new(true);

        for flag in [first.clone(), second.clone()] {
            let c = control.clone();
            engine.bind(move || (vec![c.clone()], Validation::when(flag.get(), Validators::required())));
        }
        assert!(control.invalid());
        assert_eq!(control.validators().len(), 1);

        first.set(false);
        Runtime::flush();
        assert!(control.has_validator(&Validators::required()));
        assert!(control.invalid());

        second.set(false);
        Runtime::flush();
        assert!(!control.has_validator(&Validators::required()));
        assert!(control.valid());

        first.set(true);
        Runtime::flush();
        assert!(control.has_validator(&Validators::required()));
    }

    #[test]
    fn validators_present_before_the_engine_are_left_alone() {
        let engine = ValidatorEngine::new(&Scope::new());
        let control: AbstractControl = FormControl::new(json!("")).into();
        control.add_validators([Validators::required()]);
        let on = Signal::new(true);

        let (o, c) = (on.clone(), control.clone());
        engine.bind(move || (vec![c.clone()], Validation::when(o.get(), Validators::required())));
        on.set(false);
        Runtime::flush();
        assert!(control.has_validator(&Validators::required()));
        assert_eq!(engine.revalidation_count(), 0);
    }

    #[test]
    fn dispose_stops_computations() {
        let engine = ValidatorEngine::new(&Scope::new());
        let control: AbstractControl = FormControl::new(json!("")).into();
        let on = Signal::new(false);

        let (o, c) = (on.clone(), control.clone());
        engine.bind(move || (vec![c.clone()], Validation::when(o.get(), Validators::required())));
        engine.dispose();
        on.set(true);
        Runtime::flush();
        assert!(control.valid());
        assert_eq!(engine.attach_count(), 0);
    }
}
