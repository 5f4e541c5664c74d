//! Stream-to-cell adapter
//!
//! Turns a push stream into a pull-evaluated reactive cell. Eager adapters
//! subscribe immediately; lazy ones connect on first read.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use super::context::untracked;
use super::scope::Scope;
use super::signal::{CellSource, EqualFn, ReadSignal, Signal};
use super::stream::{Observable, Subscription};
use crate::error::{FormsError, Result};
use crate::graph::NodeId;

/// Options shared by every adapter.
pub struct CellOptions<T> {
    /// Equality suppressing redundant notifications. `PartialEq` when unset.
    pub equal: Option<EqualFn<T>>,
    /// Scope whose disposal tears the subscription down.
    pub scope: Option<Scope>,
}

impl<T> Default for CellOptions<T> {
    fn default() -> Self {
        Self {
            equal: None,
            scope: None,
        }
    }
}

impl<T> Clone for CellOptions<T> {
    fn clone(&self) -> Self {
        Self {
            equal: self.equal.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<T> CellOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_equal(mut self, equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equal = Some(Rc::new(equal));
        self
    }

    pub fn with_scope(mut self, scope: &Scope) -> Self {
        self.scope = Some(scope.clone());
        self
    }
}

fn make_signal<T: Clone + PartialEq + 'static>(initial: T, equal: Option<EqualFn<T>>) -> Signal<T> {
    match equal {
        Some(equal) => Signal::with_equality(initial, equal),
        None => Signal::new(initial),
    }
}

/// Cell fed by a live subscription.
struct StreamCell<T: 'static> {
    signal: Signal<T>,
    _subscription: Rc<Subscription>,
}

impl<T: Clone + 'static> CellSource<T> for StreamCell<T> {
    fn node_id(&self) -> NodeId {
        self.signal.id()
    }

    fn read(&self) -> T {
        self.signal.get()
    }

    fn read_untracked(&self) -> T {
        self.signal.get_untracked()
    }
}

fn bind_scope(scope: Option<&Scope>, subscription: &Rc<Subscription>) {
    if let Some(scope) = scope {
        let subscription = subscription.clone();
        scope.on_dispose(move || subscription.unsubscribe());
    }
}

/// Subscribe to `source` now and expose its latest emission as a cell.
/// `initial` is shown until the first emission.
pub fn to_cell<T>(source: &Observable<T>, initial: T, options: CellOptions<T>) -> ReadSignal<T>
where
    T: Clone + PartialEq + 'static,
{
    let signal = make_signal(initial, options.equal);
    let sink = signal.clone();
    let subscription = Rc::new(untracked(|| {
        source.subscribe(move |value| {
            sink.set(value);
        })
    }));
    bind_scope(options.scope.as_ref(), &subscription);
    ReadSignal::from_source(Rc::new(StreamCell {
        signal,
        _subscription: subscription,
    }))
}

/// Like [`to_cell`] without an initial value: `None` until the first
/// emission.
pub fn to_cell_optional<T>(source: &Observable<T>, options: CellOptions<T>) -> ReadSignal<Option<T>>
where
    T: Clone + PartialEq + 'static,
{
    let equal: Option<EqualFn<Option<T>>> = options.equal.map(|eq| {
        Rc::new(move |a: &Option<T>, b: &Option<T>| match (a, b) {
            (Some(a), Some(b)) => eq(a, b),
            (None, None) => true,
            _ => false,
        }) as EqualFn<Option<T>>
    });
    let options = CellOptions {
        equal,
        scope: options.scope,
    };
    to_cell(&source.map(Some), None, options)
}

/// Build a cell from a source that must emit while being subscribed.
///
/// Fails with [`FormsError::SyncEmissionRequired`] otherwise; the
/// subscription is dropped in that case.
pub fn to_cell_sync<T>(source: &Observable<T>, options: CellOptions<T>) -> Result<ReadSignal<T>>
where
    T: Clone + PartialEq + 'static,
{
    let slot: Rc<RefCell<Option<Signal<T>>>> = Rc::new(RefCell::new(None));
    let first: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));

    let (sink, buffer) = (slot.clone(), first.clone());
    let subscription = untracked(|| {
        source.subscribe(move |value| {
            let signal = sink.borrow().clone();
            match signal {
                Some(signal) => {
                    signal.set(value);
                }
                None => *buffer.borrow_mut() = Some(value),
            }
        })
    });

    let initial = first.borrow_mut().take();
    let Some(initial) = initial else {
        drop(subscription);
        return Err(FormsError::SyncEmissionRequired);
    };
    let signal = make_signal(initial, options.equal);
    *slot.borrow_mut() = Some(signal.clone());

    let subscription = Rc::new(subscription);
    bind_scope(options.scope.as_ref(), &subscription);
    Ok(ReadSignal::from_source(Rc::new(StreamCell {
        signal,
        _subscription: subscription,
    })))
}

/// A cell that subscribes to its stream on first read.
pub struct LazyCell<T: 'static> {
    inner: Rc<LazyInner<T>>,
}

struct LazyInner<T: 'static> {
    signal: Signal<T>,
    source: Observable<T>,
    scope: Option<Scope>,
    connected: Cell<bool>,
    subscription: RefCell<Option<Rc<Subscription>>>,
}

impl<T: Clone + PartialEq + 'static> LazyInner<T> {
    fn connect(&self) {
        if self.connected.replace(true) {
            return;
        }
        trace!(cell = self.signal.id().raw(), "lazy cell connecting");
        let sink = self.signal.clone();
        // A read from inside a computation must not make that computation
        // depend on whatever the source touches while subscribing.
        let subscription = Rc::new(untracked(|| {
            self.source.subscribe(move |value| {
                sink.set(value);
            })
        }));
        *self.subscription.borrow_mut() = Some(subscription.clone());
        bind_scope(self.scope.as_ref(), &subscription);
    }
}

impl<T: Clone + PartialEq + 'static> CellSource<T> for LazyInner<T> {
    fn node_id(&self) -> NodeId {
        self.signal.id()
    }

    fn read(&self) -> T {
        self.connect();
        self.signal.get()
    }

    fn read_untracked(&self) -> T {
        self.connect();
        self.signal.get_untracked()
    }
}

impl<T: Clone + PartialEq + 'static> LazyCell<T> {
    pub fn get(&self) -> T {
        self.inner.read()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.read_untracked()
    }

    /// Whether the upstream subscription has been made.
    pub fn is_connected(&self) -> bool {
        self.inner.subscription.borrow().is_some()
    }

    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal::from_source(self.inner.clone())
    }
}

impl<T: 'static> Clone for LazyCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> From<LazyCell<T>> for ReadSignal<T> {
    fn from(cell: LazyCell<T>) -> Self {
        cell.read_only()
    }
}

/// Subscribe to `source` on the first read of the returned cell.
pub fn to_cell_lazy<T>(source: &Observable<T>, initial: T, options: CellOptions<T>) -> LazyCell<T>
where
    T: Clone + PartialEq + 'static,
{
    LazyCell {
        inner: Rc::new(LazyInner {
            signal: make_signal(initial, options.equal),
            source: source.clone(),
            scope: options.scope,
            connected: Cell::new(false),
            subscription: RefCell::new(None),
        }),
    }
}

/// Lazy cell over a shared, replaying view of `source`.
///
/// Every clone of the returned cell reads through one upstream
/// subscription, and a late connection sees the latest value.
pub fn to_cell_lazy_shared<T>(
    source: &Observable<T>,
    initial: T,
    options: CellOptions<T>,
) -> LazyCell<T>
where
    T: Clone + PartialEq + 'static,
{
    to_cell_lazy(&source.share_replay(), initial, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Runtime, Subject};
    use crate::reactive::stream::Observer;

    /// Stream over `subject` that counts subscribe and unsubscribe calls.
    fn counted(subject: &Subject<i32>) -> (Observable<i32>, Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let subscribed = Rc::new(Cell::new(0));
        let unsubscribed = Rc::new(Cell::new(0));
        let inner = subject.as_observable();
        let (s, u) = (subscribed.clone(), unsubscribed.clone());
        let source = Observable::new(move |observer: Observer<i32>| {
            s.set(s.get() + 1);
            let u = u.clone();
            inner
                .subscribe(move |v| observer(v))
                .and(Subscription::new(move || u.set(u.get() + 1)))
        });
        (source, subscribed, unsubscribed)
    }

    #[test]
    fn to_cell_shows_initial_until_emission() {
        let subject = Subject::new();
        let cell = to_cell(&subject.as_observable(), 0, CellOptions::default());
        assert_eq!(cell.get(), 0);

        subject.emit(4);
        assert_eq!(cell.get(), 4);
    }

    #[test]
    fn equal_emissions_do_not_notify() {
        let subject = Subject::new();
        let cell = to_cell(
            &subject.as_observable(),
            10,
            CellOptions::new().with_equal(|a: &i32, b: &i32| a / 10 == b / 10),
        );
        let c = cell.clone();
        let effect = Effect::new(move || {
            c.get();
        });

        subject.emit(15);
        Runtime::flush();
        assert_eq!(effect.run_count(), 1);
        assert_eq!(cell.get(), 10);

        subject.emit(21);
        Runtime::flush();
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn optional_cell_starts_unset() {
        let subject = Subject::new();
        let cell = to_cell_optional(&subject.as_observable(), CellOptions::default());
        assert_eq!(cell.get(), None);
        subject.emit("x");
        assert_eq!(cell.get(), Some("x"));
    }

    #[test]
    fn sync_cell_requires_emission() {
        let subject: Subject<i32> = Subject::new();
        let err = to_cell_sync(&subject.as_observable(), CellOptions::default());
        assert!(matches!(err, Err(FormsError::SyncEmissionRequired)));
        assert_eq!(subject.observer_count(), 0);

        let cell = to_cell_sync(&subject.as_observable().start_with(1), CellOptions::default());
        let cell = match cell {
            Ok(cell) => cell,
            Err(err) => panic!("unexpected {err}"),
        };
        assert_eq!(cell.get(), 1);
        subject.emit(2);
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn scope_disposal_unsubscribes() {
        let subject = Subject::new();
        let scope = Scope::new();
        let cell = to_cell(&subject.as_observable(), 0, CellOptions::new().with_scope(&scope));

        scope.dispose();
        subject.emit(3);
        assert_eq!(cell.get(), 0);
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn lazy_cell_connects_once_on_first_read() {
        let subject = Subject::new();
        let scope = Scope::new();
        let (source, subscribed, unsubscribed) = counted(&subject);
        let cell = to_cell_lazy(&source, 0, CellOptions::new().with_scope(&scope));

        assert!(!cell.is_connected());
        assert_eq!(subscribed.get(), 0);

        for _ in 0..3 {
            cell.get();
        }
        cell.clone().get_untracked();
        assert_eq!(subscribed.get(), 1);

        subject.emit(9);
        assert_eq!(cell.get(), 9);

        scope.dispose();
        scope.dispose();
        assert_eq!(unsubscribed.get(), 1);
    }

    #[test]
    fn lazy_connect_registers_no_dependency() {
        let subject = Subject::new();
        let side = Signal::new(0);
        let s = side.clone();
        // A source that reads a signal while subscribing.
        let inner = subject.as_observable();
        let source = Observable::new(move |observer: Observer<i32>| {
            s.get();
            inner.subscribe(move |v| observer(v))
        });
        let cell = to_cell_lazy(&source, 0, CellOptions::default());
        let c = cell.clone();
        let effect = Effect::new(move || {
            c.get();
        });
        assert_eq!(effect.dependency_count(), 1);

        side.set(1);
        Runtime::flush();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn shared_lazy_cells_share_upstream() {
        let subject = Subject::new();
        let (source, subscribed, _) = counted(&subject);
        let shared = source.share_replay();
        let a = to_cell_lazy(&shared, 0, CellOptions::default());
        let b = to_cell_lazy(&shared, 0, CellOptions::default());
        let c = to_cell_lazy_shared(&source, 0, CellOptions::default());
        let c2 = c.clone();

        a.get();
        subject.emit(5);
        b.get();
        assert_eq!(b.get(), 5);
        assert_eq!(subscribed.get(), 1);

        c.get();
        c2.get();
        assert_eq!(subscribed.get(), 2);
    }
}
