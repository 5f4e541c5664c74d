//! Push Streams
//!
//! Minimal cold observables used for control events. A stream is a
//! subscribe function; every subscriber gets its own pipeline and a
//! [`Subscription`] guard that tears it down on drop.
//!
//! [`Subject`] is the hot multicast source controls emit on. Time-based
//! operators ([`Observable::debounce`], [`Debouncer`]) run on the runtime's
//! virtual clock.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use indexmap::IndexMap;

use super::runtime::{Runtime, TimerId};

/// Callback receiving stream emissions.
pub type Observer<T> = Rc<dyn Fn(T)>;

type SubscribeFn<T> = Rc<dyn Fn(Observer<T>) -> Subscription>;

/// RAII guard for a stream subscription. Unsubscribes when dropped.
pub struct Subscription {
    teardown: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + 'static) -> Self {
        Self {
            teardown: RefCell::new(Some(Box::new(teardown))),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self {
            teardown: RefCell::new(None),
        }
    }

    /// Tear the subscription down. Later calls do nothing.
    pub fn unsubscribe(&self) {
        let teardown = self.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.teardown.borrow().is_none()
    }

    /// Combine two subscriptions into one.
    pub fn and(self, other: Subscription) -> Subscription {
        Subscription::new(move || {
            self.unsubscribe();
            other.unsubscribe();
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A cold push stream.
pub struct Observable<T: 'static> {
    subscribe_fn: SubscribeFn<T>,
}

impl<T: 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            subscribe_fn: Rc::clone(&self.subscribe_fn),
        }
    }
}

impl<T: Clone + 'static> Observable<T> {
    pub fn new(subscribe: impl Fn(Observer<T>) -> Subscription + 'static) -> Self {
        Self {
            subscribe_fn: Rc::new(subscribe),
        }
    }

    pub fn subscribe(&self, observer: impl Fn(T) + 'static) -> Subscription {
        (self.subscribe_fn)(Rc::new(observer))
    }

    fn subscribe_observer(&self, observer: Observer<T>) -> Subscription {
        (self.subscribe_fn)(observer)
    }

    /// Emit `value` synchronously to every subscriber.
    pub fn of(value: T) -> Self {
        Self::new(move |observer| {
            observer(value.clone());
            Subscription::empty()
        })
    }

    /// A stream that never emits.
    pub fn never() -> Self {
        Self::new(|_| Subscription::empty())
    }

    pub fn map<U: Clone + 'static>(&self, f: impl Fn(T) -> U + 'static) -> Observable<U> {
        let source = self.clone();
        let f = Rc::new(f);
        Observable::new(move |observer: Observer<U>| {
            let f = f.clone();
            source.subscribe(move |value| observer(f(value)))
        })
    }

    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Observable<T> {
        let source = self.clone();
        let predicate = Rc::new(predicate);
        Observable::new(move |observer: Observer<T>| {
            let predicate = predicate.clone();
            source.subscribe(move |value| {
                if predicate(&value) {
                    observer(value);
                }
            })
        })
    }

    pub fn filter_map<U: Clone + 'static>(
        &self,
        f: impl Fn(T) -> Option<U> + 'static,
    ) -> Observable<U> {
        let source = self.clone();
        let f = Rc::new(f);
        Observable::new(move |observer: Observer<U>| {
            let f = f.clone();
            source.subscribe(move |value| {
                if let Some(mapped) = f(value) {
                    observer(mapped);
                }
            })
        })
    }

    /// Emit `value` synchronously on subscribe, then forward the source.
    pub fn start_with(&self, value: T) -> Observable<T> {
        let source = self.clone();
        Observable::new(move |observer: Observer<T>| {
            observer(value.clone());
            source.subscribe_observer(observer)
        })
    }

    /// Drop emissions equal to the previous one.
    pub fn distinct_until_changed(&self) -> Observable<T>
    where
        T: PartialEq,
    {
        let source = self.clone();
        Observable::new(move |observer: Observer<T>| {
            let last: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
            source.subscribe(move |value| {
                let repeated = last.borrow().as_ref() == Some(&value);
                if !repeated {
                    *last.borrow_mut() = Some(value.clone());
                    observer(value);
                }
            })
        })
    }

    /// Emit the latest value once `delay` of quiet time has passed.
    ///
    /// A zero delay defers delivery to the next [`Runtime::tick`].
    pub fn debounce(&self, delay: Duration) -> Observable<T> {
        let source = self.clone();
        Observable::new(move |observer: Observer<T>| {
            let timer: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
            let t = timer.clone();
            let upstream = source.subscribe(move |value| {
                if let Some(previous) = t.take() {
                    Runtime::clear_timeout(previous);
                }
                let observer = observer.clone();
                let fired = Rc::downgrade(&t);
                t.set(Some(Runtime::set_timeout(delay, move || {
                    if let Some(slot) = fired.upgrade() {
                        slot.set(None);
                    }
                    observer(value);
                })));
            });
            upstream.and(Subscription::new(move || {
                if let Some(pending) = timer.take() {
                    Runtime::clear_timeout(pending);
                }
            }))
        })
    }

    /// Debounce through a shared [`Debouncer`], coalescing with every other
    /// stream using the same debouncer.
    pub fn debounce_with(&self, debouncer: &Debouncer) -> Observable<T> {
        let source = self.clone();
        let debouncer = debouncer.clone();
        Observable::new(move |observer: Observer<T>| {
            let key = debouncer.next_key();
            let d = debouncer.clone();
            let upstream = source.subscribe(move |value| {
                let observer = observer.clone();
                d.enqueue(key, move || observer(value));
            });
            let d = debouncer.clone();
            upstream.and(Subscription::new(move || d.cancel(key)))
        })
    }

    /// Share one upstream subscription between all subscribers and replay
    /// the latest value to late subscribers. The upstream is dropped when
    /// the last subscriber leaves.
    pub fn share_replay(&self) -> Observable<T> {
        let shared = Rc::new(Shared {
            source: self.clone(),
            observers: RefCell::new(IndexMap::new()),
            last: RefCell::new(None),
            upstream: RefCell::new(None),
            next_key: Cell::new(0),
        });
        Observable::new(move |observer: Observer<T>| Shared::subscribe(&shared, observer))
    }
}

struct Shared<T: 'static> {
    source: Observable<T>,
    observers: RefCell<IndexMap<u64, Observer<T>>>,
    last: RefCell<Option<T>>,
    upstream: RefCell<Option<Subscription>>,
    next_key: Cell<u64>,
}

impl<T: Clone + 'static> Shared<T> {
    fn subscribe(this: &Rc<Self>, observer: Observer<T>) -> Subscription {
        let key = this.next_key.get();
        this.next_key.set(key + 1);
        this.observers.borrow_mut().insert(key, observer.clone());

        let connected = this.upstream.borrow().is_some();
        if connected {
            let replay = this.last.borrow().clone();
            if let Some(value) = replay {
                observer(value);
            }
        } else {
            let weak = Rc::downgrade(this);
            let upstream = this.source.subscribe(move |value: T| {
                if let Some(shared) = weak.upgrade() {
                    shared.emit(value);
                }
            });
            *this.upstream.borrow_mut() = Some(upstream);
        }

        let weak = Rc::downgrade(this);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.leave(key);
            }
        })
    }

    fn emit(&self, value: T) {
        *self.last.borrow_mut() = Some(value.clone());
        let observers: Vec<Observer<T>> = self.observers.borrow().values().cloned().collect();
        for observer in observers {
            observer(value.clone());
        }
    }

    fn leave(&self, key: u64) {
        let emptied = {
            let mut observers = self.observers.borrow_mut();
            observers.shift_remove(&key);
            observers.is_empty()
        };
        if emptied {
            let upstream = self.upstream.borrow_mut().take();
            self.last.borrow_mut().take();
            drop(upstream);
        }
    }
}

/// Hot multicast source.
pub struct Subject<T: 'static> {
    inner: Rc<SubjectInner<T>>,
}

struct SubjectInner<T: 'static> {
    observers: RefCell<IndexMap<u64, Observer<T>>>,
    next_key: Cell<u64>,
}

impl<T: Clone + 'static> Subject<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SubjectInner {
                observers: RefCell::new(IndexMap::new()),
                next_key: Cell::new(0),
            }),
        }
    }

    /// Deliver `value` to every current observer. Observers added during
    /// delivery see the next emission only.
    pub fn emit(&self, value: T) {
        let observers: Vec<Observer<T>> =
            self.inner.observers.borrow().values().cloned().collect();
        for observer in observers {
            observer(value.clone());
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    pub fn as_observable(&self) -> Observable<T> {
        let weak = Rc::downgrade(&self.inner);
        Observable::new(move |observer: Observer<T>| {
            let Some(inner) = weak.upgrade() else {
                return Subscription::empty();
            };
            let key = inner.next_key.get();
            inner.next_key.set(key + 1);
            inner.observers.borrow_mut().insert(key, observer);
            let weak: Weak<SubjectInner<T>> = Rc::downgrade(&inner);
            Subscription::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let removed = inner.observers.borrow_mut().shift_remove(&key);
                    drop(removed);
                }
            })
        })
    }
}

impl<T: Clone + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared debounce window.
///
/// Updates enqueued through the same debouncer are held until the window
/// has been quiet for `delay`, then delivered together in one timer
/// callback, in first-enqueue order, one update per key.
#[derive(Clone)]
pub struct Debouncer {
    inner: Rc<DebouncerInner>,
}

struct DebouncerInner {
    delay: Duration,
    timer: Cell<Option<TimerId>>,
    queue: RefCell<IndexMap<u64, Box<dyn FnOnce()>>>,
    next_key: Cell<u64>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Rc::new(DebouncerInner {
                delay,
                timer: Cell::new(None),
                queue: RefCell::new(IndexMap::new()),
                next_key: Cell::new(0),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Allocate a key for a new producer.
    pub fn next_key(&self) -> u64 {
        let key = self.inner.next_key.get();
        self.inner.next_key.set(key + 1);
        key
    }

    /// Queue `update` under `key`, replacing any update queued earlier for
    /// the same key, and restart the window.
    pub fn enqueue(&self, key: u64, update: impl FnOnce() + 'static) {
        let replaced = self.inner.queue.borrow_mut().insert(key, Box::new(update));
        drop(replaced);
        self.restart();
    }

    /// Drop the update queued under `key`, if any.
    pub fn cancel(&self, key: u64) {
        let removed = self.inner.queue.borrow_mut().shift_remove(&key);
        drop(removed);
        if self.inner.queue.borrow().is_empty() {
            if let Some(timer) = self.inner.timer.take() {
                Runtime::clear_timeout(timer);
            }
        }
    }

    /// Number of queued updates.
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    fn restart(&self) {
        if let Some(timer) = self.inner.timer.take() {
            Runtime::clear_timeout(timer);
        }
        let weak = Rc::downgrade(&self.inner);
        let timer = Runtime::set_timeout(self.inner.delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.timer.set(None);
                let batch = std::mem::take(&mut *inner.queue.borrow_mut());
                for (_, update) in batch {
                    update();
                }
            }
        });
        self.inner.timer.set(Some(timer));
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.inner.delay)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<T: Clone + 'static>(stream: &Observable<T>) -> (Rc<RefCell<Vec<T>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let sub = stream.subscribe(move |v| s.borrow_mut().push(v));
        (seen, sub)
    }

    #[test]
    fn subject_multicasts_until_unsubscribed() {
        let subject = Subject::new();
        let (first, sub1) = collect(&subject.as_observable());
        let (second, _sub2) = collect(&subject.as_observable());

        subject.emit(1);
        drop(sub1);
        subject.emit(2);

        assert_eq!(*first.borrow(), vec![1]);
        assert_eq!(*second.borrow(), vec![1, 2]);
        assert_eq!(subject.observer_count(), 1);
    }

    #[test]
    fn operators_compose() {
        let subject = Subject::new();
        let stream = subject
            .as_observable()
            .filter(|v: &i32| *v >= 0)
            .map(|v| v * 10)
            .distinct_until_changed()
            .start_with(-1);
        let (seen, _sub) = collect(&stream);

        for v in [1, 1, -5, 2] {
            subject.emit(v);
        }
        assert_eq!(*seen.borrow(), vec![-1, 10, 20]);
    }

    #[test]
    fn debounce_keeps_latest_value() {
        let subject = Subject::new();
        let (seen, _sub) = collect(&subject.as_observable().debounce(Duration::from_millis(50)));

        subject.emit("a");
        Runtime::advance_by(Duration::from_millis(30));
        subject.emit("b");
        Runtime::advance_by(Duration::from_millis(30));
        assert!(seen.borrow().is_empty());

        Runtime::advance_by(Duration::from_millis(20));
        assert_eq!(*seen.borrow(), vec!["b"]);
    }

    #[test]
    fn unsubscribe_cancels_pending_debounce() {
        let subject = Subject::new();
        let (seen, sub) = collect(&subject.as_observable().debounce(Duration::ZERO));
        subject.emit(1);
        drop(sub);
        Runtime::tick();
        assert!(seen.borrow().is_empty());
        assert_eq!(Runtime::pending_timers(), 0);
    }

    #[test]
    fn shared_debouncer_batches_streams() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        let a = Subject::new();
        let b = Subject::new();
        let (seen_a, _sa) = collect(&a.as_observable().debounce_with(&debouncer));
        let (seen_b, _sb) = collect(&b.as_observable().debounce_with(&debouncer));

        a.emit(1);
        Runtime::advance_by(Duration::from_millis(8));
        b.emit(2);
        a.emit(3);
        assert_eq!(debouncer.pending(), 2);

        Runtime::advance_by(Duration::from_millis(8));
        assert!(seen_a.borrow().is_empty());

        Runtime::advance_by(Duration::from_millis(2));
        assert_eq!(*seen_a.borrow(), vec![3]);
        assert_eq!(*seen_b.borrow(), vec![2]);
    }

    #[test]
    fn share_replay_connects_once() {
        let subscribes = Rc::new(Cell::new(0));
        let subject = Subject::new();
        let source = {
            let inner = subject.as_observable();
            let count = subscribes.clone();
            Observable::new(move |observer: Observer<i32>| {
                count.set(count.get() + 1);
                inner.subscribe(move |v| observer(v))
            })
        };
        let shared = source.share_replay();

        let (first, sub1) = collect(&shared);
        subject.emit(7);
        let (late, sub2) = collect(&shared);
        assert_eq!(subscribes.get(), 1);
        assert_eq!(*first.borrow(), vec![7]);
        assert_eq!(*late.borrow(), vec![7]);

        drop(sub1);
        drop(sub2);
        assert_eq!(subject.observer_count(), 0);
    }
}
