#![forbid(unsafe_code)]

//! Deferred notification scopes.
//!
//! While a [`BatchScope`] is alive, observables still update their values
//! immediately but queue their notifications. When the outermost scope is
//! dropped, the queue is drained in the order observables first changed.
//! Notifications fired *while draining* run immediately, so effects that
//! write back into other cells propagate transitively in the same pass.
//!
//! Scopes nest; only the outermost one flushes. State is thread-local, which
//! matches the single-threaded engine.

use std::cell::RefCell;
use std::marker::PhantomData;

use tracing::trace;

type Deferred = Box<dyn FnOnce()>;

#[derive(Default)]
struct BatchState {
    depth: usize,
    queue: Vec<Deferred>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Whether a batch scope is currently open on this thread.
#[must_use]
pub fn is_batching() -> bool {
    BATCH.with(|b| b.borrow().depth > 0)
}

pub(crate) fn defer(notification: Deferred) {
    BATCH.with(|b| b.borrow_mut().queue.push(notification));
}

fn flush() {
    loop {
        let queue = BATCH.with(|b| std::mem::take(&mut b.borrow_mut().queue));
        if queue.is_empty() {
            break;
        }
        trace!(notifications = queue.len(), "batch flush");
        for notification in queue {
            notification();
        }
    }
}

/// RAII guard deferring observable notifications until it is dropped.
#[must_use = "a BatchScope flushes when dropped"]
pub struct BatchScope {
    _not_send: PhantomData<*const ()>,
}

impl BatchScope {
    pub fn new() -> Self {
        BATCH.with(|b| b.borrow_mut().depth += 1);
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope").finish()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let outermost = BATCH.with(|b| {
            let mut state = b.borrow_mut();
            state.depth -= 1;
            state.depth == 0
        });
        if outermost {
            flush();
        }
    }
}

/// Run `f` inside a batch scope.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _scope = BatchScope::new();
    f()
}
