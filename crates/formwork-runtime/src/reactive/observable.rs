#![forbid(unsafe_code)]

//! Shared, version-tracked values with change notification.
//!
//! # Invariants
//!
//! 1. `version` increments exactly once per `set`/`update` that changes the
//!    value.
//! 2. Subscribers run in registration order, after the value is updated and
//!    with no internal borrow held, so a subscriber may read or write any
//!    observable (including this one).
//! 3. Setting a value equal to the current one is a no-op.
//! 4. Inside a [`BatchScope`](super::BatchScope) the value updates
//!    immediately but subscribers run once, with the final value, when the
//!    outermost scope exits.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::batch;

/// RAII guard keeping a change callback registered.
///
/// Dropping the guard unregisters the callback; the source prunes the dead
/// entry lazily on its next notification.
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    _guard: Box<dyn Any>,
}

impl Subscription {
    pub(crate) fn new<G: 'static>(guard: G) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscription")
    }
}

/// Something whose changes can be observed without knowing its value type.
///
/// Effects and computed values depend on a list of `Trigger`s; the form uses
/// this to wire explicit dependency edges between heterogeneous cells.
pub trait Trigger {
    /// Register `callback` to run after every change.
    fn on_change(&self, callback: Rc<dyn Fn()>) -> Subscription;
}

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<Weak<dyn Fn(&T)>>,
    /// Queued for notification in the active batch.
    pending: bool,
}

/// A mutable value holder that notifies subscribers on change.
///
/// Cloning an `Observable` yields another handle to the **same** value.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
                pending: false,
            })),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the current value.
    ///
    /// The closure must not write to this observable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Replace the value; no-op when equal to the current value.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }

    /// Mutate in place; notifies only if the value actually changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get();
        f(&mut next);
        self.set(next);
    }

    /// Number of effective mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Register a callback receiving the new value after each change.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: Rc<dyn Fn(&T)> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription::new(strong)
    }

    /// Live subscriber count (dead entries excluded).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    fn notify(&self) {
        if batch::is_batching() {
            let mut inner = self.inner.borrow_mut();
            if !inner.pending {
                inner.pending = true;
                let this = self.clone();
                batch::defer(Box::new(move || {
                    this.inner.borrow_mut().pending = false;
                    this.notify_now();
                }));
            }
            return;
        }
        self.notify_now();
    }

    fn notify_now(&self) {
        let (callbacks, value) = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            let callbacks: Vec<Rc<dyn Fn(&T)>> =
                inner.subscribers.iter().filter_map(Weak::upgrade).collect();
            (callbacks, inner.value.clone())
        };
        for callback in callbacks {
            callback(&value);
        }
    }
}

impl<T: Clone + PartialEq + 'static> Trigger for Observable<T> {
    fn on_change(&self, callback: Rc<dyn Fn()>) -> Subscription {
        self.subscribe(move |_| callback())
    }
}
