#![forbid(unsafe_code)]

//! Side-effect subscriptions that re-run when their sources change.
//!
//! An [`Effect`] owns a callback and a list of [`Trigger`] sources. It runs
//! the callback (immediately for [`Effect::new`], on first change for
//! [`Effect::lazy`]) and again after every change of any source, until it is
//! disposed.
//!
//! A change that arrives while the callback is running does not recurse; it
//! schedules one more run after the current one returns. Runs are capped at
//! [`MAX_CONSECUTIVE_RUNS`] per trigger so a feedback loop degrades into a
//! logged warning instead of a hang.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{trace, warn};

use super::observable::{Subscription, Trigger};

/// Upper bound on back-to-back re-runs caused by a single trigger.
pub const MAX_CONSECUTIVE_RUNS: usize = 64;

struct EffectInner {
    label: String,
    callback: RefCell<Box<dyn FnMut()>>,
    running: Cell<bool>,
    rerun: Cell<bool>,
    disposed: Cell<bool>,
    runs: Cell<u64>,
    subscriptions: RefCell<Vec<Subscription>>,
}

/// Resets `running` even if the callback panics.
struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn execute(inner: &Rc<EffectInner>) {
    if inner.disposed.get() {
        return;
    }
    if inner.running.get() {
        inner.rerun.set(true);
        return;
    }
    inner.running.set(true);
    let _guard = RunningGuard(&inner.running);
    let mut passes = 0;
    loop {
        inner.rerun.set(false);
        inner.runs.set(inner.runs.get() + 1);
        trace!(effect = %inner.label, run = inner.runs.get(), "effect run");
        (inner.callback.borrow_mut())();
        passes += 1;
        if !inner.rerun.get() || inner.disposed.get() {
            break;
        }
        if passes >= MAX_CONSECUTIVE_RUNS {
            warn!(effect = %inner.label, passes, "effect keeps re-triggering itself; giving up");
            break;
        }
    }
}

/// A callback that re-runs whenever one of its sources changes.
///
/// Dropping the handle disposes the effect.
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("label", &self.inner.label)
            .field("runs", &self.inner.runs.get())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

impl Effect {
    /// Create an effect and run it once immediately.
    pub fn new(
        label: impl Into<String>,
        sources: &[&dyn Trigger],
        callback: impl FnMut() + 'static,
    ) -> Self {
        let effect = Self::lazy(label, sources, callback);
        effect.run();
        effect
    }

    /// Create an effect that first runs on the next source change.
    pub fn lazy(
        label: impl Into<String>,
        sources: &[&dyn Trigger],
        callback: impl FnMut() + 'static,
    ) -> Self {
        let inner = Rc::new(EffectInner {
            label: label.into(),
            callback: RefCell::new(Box::new(callback)),
            running: Cell::new(false),
            rerun: Cell::new(false),
            disposed: Cell::new(false),
            runs: Cell::new(0),
            subscriptions: RefCell::new(Vec::with_capacity(sources.len())),
        });
        for source in sources {
            let weak = Rc::downgrade(&inner);
            let sub = source.on_change(Rc::new(move || {
                if let Some(strong) = weak.upgrade() {
                    execute(&strong);
                }
            }));
            inner.subscriptions.borrow_mut().push(sub);
        }
        Self { inner }
    }

    /// Run the callback now (no-op once disposed).
    pub fn run(&self) {
        execute(&self.inner);
    }

    /// Stop reacting to sources. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.inner.subscriptions.borrow_mut().clear();
        trace!(effect = %self.inner.label, "effect disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Total number of callback invocations.
    #[must_use]
    pub fn run_count(&self) -> u64 {
        self.inner.runs.get()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{BatchScope, Computed, Observable};

    #[test]
    fn runs_immediately_and_on_change() {
        let source = Observable::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (s, src) = (Rc::clone(&seen), source.clone());
        let effect = Effect::new("log", &[&source], move || s.borrow_mut().push(src.get()));

        source.set(2);
        source.set(3);
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert_eq!(effect.run_count(), 3);
    }

    #[test]
    fn lazy_waits_for_first_change() {
        let source = Observable::new(1);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _effect = Effect::lazy("lazy", &[&source], move || h.set(h.get() + 1));
        assert_eq!(hits.get(), 0);
        source.set(2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn dispose_stops_reruns_and_is_idempotent() {
        let source = Observable::new(0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let effect = Effect::new("e", &[&source], move || h.set(h.get() + 1));
        effect.dispose();
        effect.dispose();
        source.set(1);
        assert_eq!(hits.get(), 1);
        assert!(effect.is_disposed());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn dropping_handle_disposes() {
        let source = Observable::new(0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        drop(Effect::new("e", &[&source], move || h.set(h.get() + 1)));
        source.set(1);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn writes_propagate_through_chained_effects() {
        let a = Observable::new(1);
        let b = Observable::new(0);
        let c = Observable::new(0);

        let (a1, b1) = (a.clone(), b.clone());
        let _e1 = Effect::new("b = a * 2", &[&a], move || b1.set(a1.get() * 2));
        let (b2, c2) = (b.clone(), c.clone());
        let _e2 = Effect::new("c = b + 1", &[&b], move || c2.set(b2.get() + 1));

        assert_eq!(c.get(), 3);
        a.set(10);
        assert_eq!(b.get(), 20);
        assert_eq!(c.get(), 21);
    }

    #[test]
    fn self_trigger_is_coalesced_and_capped() {
        let counter = Observable::new(0);
        let c = counter.clone();
        let effect = Effect::new("runaway", &[&counter], move || c.set(c.get() + 1));
        // One initial pass plus bounded re-runs; never a hang.
        assert!(effect.run_count() as usize <= MAX_CONSECUTIVE_RUNS);
        assert!(counter.get() >= 1);
    }

    #[test]
    fn batched_sources_trigger_once() {
        let a = Observable::new(0);
        let b = Observable::new(0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let effect = Effect::lazy("sum", &[&a, &b], move || h.set(h.get() + 1));
        {
            let _batch = BatchScope::new();
            a.set(1);
            a.set(2);
        }
        assert_eq!(hits.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn computed_sources_trigger_effects() {
        let a = Observable::new(1);
        let doubled = Computed::from_observable(&a, |v| v * 2);
        let seen = Rc::new(Cell::new(0));
        let (s, d) = (Rc::clone(&seen), doubled.clone());
        let _effect = Effect::new("watch doubled", &[&doubled], move || s.set(d.get()));
        a.set(4);
        assert_eq!(seen.get(), 8);
    }
}
