#![forbid(unsafe_code)]

//! Lazy derived values that track [`Trigger`] sources.
//!
//! # Design
//!
//! [`Computed<T>`] wraps a compute function and its cached result. When any
//! source changes, the cache is marked dirty and the change is forwarded to
//! the computed's own listeners, so a `Computed` can itself be a source for
//! other computeds and effects. The next [`get()`](Computed::get) recomputes.
//!
//! # Invariants
//!
//! 1. `get()` never returns a value that is stale with respect to its
//!    sources once a mutation has completed.
//! 2. The compute function runs at most once per invalidation.
//! 3. `version` increments by exactly 1 per recomputation.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: the cache stays empty, so the next `get()`
//!   retries.
//! - **Source dropped**: its subscription goes inert; the computed keeps its
//!   last cached result.
//! - **Re-entrant read**: a compute function that reads its own `Computed`
//!   panics on the `RefCell` borrow. Derived graphs must be acyclic.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::observable::{Observable, Subscription, Trigger};

struct ComputedInner<T> {
    compute: Box<dyn Fn() -> T>,
    cached: RefCell<Option<T>>,
    dirty: Cell<bool>,
    version: Cell<u64>,
    listeners: RefCell<Vec<Weak<dyn Fn()>>>,
    /// Kept alive for the lifetime of the computed; never read.
    subscriptions: RefCell<Vec<Subscription>>,
}

impl<T> ComputedInner<T> {
    fn mark_dirty(&self) {
        self.dirty.set(true);
        let listeners: Vec<Rc<dyn Fn()>> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|w| w.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener();
        }
    }
}

/// A lazily evaluated, memoized value derived from other cells.
///
/// Cloning a `Computed` creates another handle to the **same** cache.
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("cached", &self.inner.cached.borrow())
            .field("dirty", &self.inner.dirty.get())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

impl<T: Clone + 'static> Computed<T> {
    fn with_compute(compute: Box<dyn Fn() -> T>, subscriptions: Vec<Subscription>) -> Self {
        Self {
            inner: Rc::new(ComputedInner {
                compute,
                cached: RefCell::new(None),
                dirty: Cell::new(true),
                version: Cell::new(0),
                listeners: RefCell::new(Vec::new()),
                subscriptions: RefCell::new(subscriptions),
            }),
        }
    }

    fn watch(&self, source: &dyn Trigger) {
        let weak = Rc::downgrade(&self.inner);
        let sub = source.on_change(Rc::new(move || {
            if let Some(strong) = weak.upgrade() {
                strong.mark_dirty();
            }
        }));
        self.inner.subscriptions.borrow_mut().push(sub);
    }

    /// Derive from a single observable.
    pub fn from_observable<S: Clone + PartialEq + 'static>(
        source: &Observable<S>,
        map: impl Fn(&S) -> T + 'static,
    ) -> Self {
        let source_clone = source.clone();
        let computed = Self::with_compute(
            Box::new(move || source_clone.with(|v| map(v))),
            Vec::new(),
        );
        computed.watch(source);
        computed
    }

    /// Derive from any number of sources. `compute` reads whatever it needs;
    /// `sources` lists the cells whose changes invalidate the cache.
    pub fn from_sources(sources: &[&dyn Trigger], compute: impl Fn() -> T + 'static) -> Self {
        let computed = Self::with_compute(Box::new(compute), Vec::new());
        for source in sources {
            computed.watch(*source);
        }
        computed
    }

    /// Low-level constructor: the caller manages invalidation through the
    /// supplied subscriptions or [`invalidate`](Self::invalidate).
    pub fn from_fn(compute: impl Fn() -> T + 'static, subscriptions: Vec<Subscription>) -> Self {
        Self::with_compute(Box::new(compute), subscriptions)
    }

    /// Add another invalidation source after construction.
    pub fn depend_on(&self, source: &dyn Trigger) {
        self.watch(source);
    }

    /// Current value, recomputing first if any source changed.
    #[must_use]
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Borrow the current value, recomputing first if needed.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let mut cached = self.inner.cached.borrow_mut();
        if self.inner.dirty.replace(false) {
            *cached = None;
        }
        let value = cached.get_or_insert_with(|| {
            self.inner.version.set(self.inner.version.get() + 1);
            (self.inner.compute)()
        });
        f(value)
    }

    /// Whether the cache is stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get() || self.inner.cached.borrow().is_none()
    }

    /// Force the next `get()` to recompute, notifying downstream listeners.
    pub fn invalidate(&self) {
        self.inner.mark_dirty();
    }

    /// Number of recomputations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }
}

impl<T: Clone + 'static> Trigger for Computed<T> {
    fn on_change(&self, callback: Rc<dyn Fn()>) -> Subscription {
        self.inner
            .listeners
            .borrow_mut()
            .push(Rc::downgrade(&callback));
        Subscription::new(callback)
    }
}
