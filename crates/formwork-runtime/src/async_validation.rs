#![forbid(unsafe_code)]

//! Debounced, cancellable asynchronous validation for one field.
//!
//! An [`AsyncValidation`] wraps an external check (say, "is this username
//! taken?") and exposes its verdict through two cells: `error` and
//! `loading`.
//!
//! # Session model
//!
//! At most one session is active per controller. A session is a generation
//! number, a child [`Cx`] of the controller's root context, and (for the
//! debounced path) an [`AbortHandle`] for the spawned timer task. Starting a
//! new validation cancels the previous session first, so:
//!
//! - a pending debounce timer is aborted before it fires;
//! - an in-flight check sees its `Cx` cancelled and, whatever it returns, its
//!   result is dropped because its generation is no longer current.
//!
//! Of N overlapping `validate` calls only the verdict of the last one ever
//! reaches the `error` cell.
//!
//! # Failure policy
//!
//! [`AsyncCheckError::Failed`] is logged at WARN and leaves `error` as it
//! was: one flaky backend must not block the rest of the form.
//! [`AsyncCheckError::Cancelled`] is silent.
//!
//! # Runtime requirements
//!
//! [`AsyncValidation::validate`] spawns onto the current tokio
//! [`LocalSet`](tokio::task::LocalSet) and panics outside one.
//! [`AsyncValidation::validate_async`] is awaited in place and only needs a
//! tokio time driver when a timeout is configured.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use formwork_core::{AsyncCheckError, Cx, CxController, Value};
use futures::FutureExt;
use futures::future::{AbortHandle, Abortable, LocalBoxFuture};
use tracing::{debug, trace, warn};

use crate::reactive::Observable;

/// Future returned by an async validator: `Ok(None)` means valid,
/// `Ok(Some(message))` invalid.
pub type ValidatorFuture = LocalBoxFuture<'static, Result<Option<String>, AsyncCheckError>>;

/// An external asynchronous check. Receives the value and the session's
/// cancellation token.
pub type AsyncValidatorFn = Rc<dyn Fn(Value, Cx) -> ValidatorFuture>;

/// Wrap an `async` closure as an [`AsyncValidatorFn`].
pub fn async_validator<F, Fut>(f: F) -> AsyncValidatorFn
where
    F: Fn(Value, Cx) -> Fut + 'static,
    Fut: Future<Output = Result<Option<String>, AsyncCheckError>> + 'static,
{
    Rc::new(move |value, cx| f(value, cx).boxed_local())
}

struct Session {
    generation: u64,
    ctrl: CxController,
    abort: Option<AbortHandle>,
}

impl Session {
    fn cancel(self) {
        self.ctrl.cancel();
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

struct ControllerInner {
    field: String,
    validator: AsyncValidatorFn,
    debounce: Duration,
    timeout: Option<Duration>,
    root: Cx,
    error: Observable<Option<String>>,
    loading: Observable<bool>,
    session: RefCell<Option<Session>>,
    generation: Cell<u64>,
}

impl ControllerInner {
    fn begin(&self, abort: Option<AbortHandle>) -> (u64, Cx) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        let (cx, ctrl) = match self.timeout {
            Some(limit) => self.root.child(limit),
            None => self.root.child_inherit(),
        };
        *self.session.borrow_mut() = Some(Session {
            generation,
            ctrl,
            abort,
        });
        (generation, cx)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .borrow()
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    fn cancel(&self) -> bool {
        let session = self.session.borrow_mut().take();
        self.loading.set(false);
        match session {
            Some(session) => {
                trace!(field = %self.field, generation = session.generation, "async session cancelled");
                session.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop session `generation` if it is still the active one.
    fn release(&self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let session = self.session.borrow_mut().take();
        if let Some(session) = session {
            trace!(field = %self.field, generation, "async session released");
            session.cancel();
        }
        self.loading.set(false);
    }

    /// Call the validator and, if this session is still current, commit.
    /// Returns the verdict either way (`None` for valid, failed, or
    /// cancelled checks).
    ///
    /// If the returned future is dropped mid-check, or the session's token
    /// is cancelled from above, the session is released so `loading` and
    /// `is_pending` do not stay set.
    async fn run_check(self: Rc<Self>, value: Value, cx: Cx, generation: u64) -> Option<String> {
        let _release = ReleaseOnDrop {
            inner: Rc::clone(&self),
            generation,
        };
        self.loading.set(true);
        let check = (self.validator)(value, cx.clone());
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, check).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AsyncCheckError::Failed(format!(
                    "timed out after {}ms",
                    limit.as_millis()
                ))),
            },
            None => check.await,
        };

        let verdict = match &outcome {
            Ok(verdict) => verdict.clone(),
            Err(_) => None,
        };

        if cx.is_cancelled() || !self.is_current(generation) {
            trace!(field = %self.field, generation, "stale async result discarded");
            return verdict;
        }

        self.session.borrow_mut().take();
        self.loading.set(false);
        match outcome {
            Ok(verdict) => {
                debug!(field = %self.field, generation, valid = verdict.is_none(), "async validation settled");
                self.error.set(verdict);
            }
            Err(AsyncCheckError::Cancelled) => {}
            Err(AsyncCheckError::Failed(reason)) => {
                warn!(field = %self.field, %reason, "async validator failed; keeping previous verdict");
            }
        }
        verdict
    }
}

struct ReleaseOnDrop {
    inner: Rc<ControllerInner>,
    generation: u64,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.inner.release(self.generation);
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel();
        }
    }
}

/// Per-field asynchronous validation controller.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct AsyncValidation {
    inner: Rc<ControllerInner>,
}

impl fmt::Debug for AsyncValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncValidation")
            .field("field", &self.inner.field)
            .field("debounce", &self.inner.debounce)
            .field("error", &self.inner.error.get())
            .field("loading", &self.inner.loading.get())
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl AsyncValidation {
    /// Controller with its own root cancellation context.
    pub fn new(field: impl Into<String>, validator: AsyncValidatorFn, debounce: Duration) -> Self {
        let (root, _ctrl) = Cx::background();
        Self::with_parent(field, validator, debounce, &root)
    }

    /// Controller whose sessions are children of `parent`; cancelling the
    /// parent cancels every session.
    pub fn with_parent(
        field: impl Into<String>,
        validator: AsyncValidatorFn,
        debounce: Duration,
        parent: &Cx,
    ) -> Self {
        let (root, _ctrl) = parent.child_inherit();
        Self {
            inner: Rc::new(ControllerInner {
                field: field.into(),
                validator,
                debounce,
                timeout: None,
                root,
                error: Observable::new(None),
                loading: Observable::new(false),
                session: RefCell::new(None),
                generation: Cell::new(0),
            }),
        }
    }

    /// Treat checks running longer than `limit` as failed (fail-open).
    ///
    /// Must be called before the controller is shared.
    #[must_use]
    pub fn with_timeout(self, limit: Duration) -> Self {
        match Rc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.timeout = Some(limit);
                Self {
                    inner: Rc::new(inner),
                }
            }
            Err(inner) => {
                warn!(field = %inner.field, "timeout ignored: controller already shared");
                Self { inner }
            }
        }
    }

    /// Start a debounced validation of `value`, superseding any earlier one.
    ///
    /// Empty values clear the error immediately without calling the
    /// validator.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio `LocalSet` with a non-empty value.
    pub fn validate(&self, value: Value) {
        self.inner.cancel();
        if value.is_empty() {
            self.inner.error.set(None);
            return;
        }

        let (abort, registration) = AbortHandle::new_pair();
        let (generation, cx) = self.inner.begin(Some(abort));
        let weak = Rc::downgrade(&self.inner);
        let debounce = self.inner.debounce;
        trace!(field = %self.inner.field, generation, ?debounce, "async validation scheduled");

        let task = async move {
            tokio::time::sleep(debounce).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if cx.is_cancelled() || !inner.is_current(generation) {
                inner.release(generation);
                return;
            }
            let _ = inner.run_check(value, cx, generation).await;
        };
        drop(tokio::task::spawn_local(Abortable::new(task, registration)));
    }

    /// Validate `value` now, without debounce, and return the verdict.
    ///
    /// The verdict is committed to `error` unless a newer validation
    /// superseded this one while it was in flight. Failed and cancelled
    /// checks resolve to `None`.
    pub async fn validate_async(&self, value: Value) -> Option<String> {
        self.inner.cancel();
        if value.is_empty() {
            self.inner.error.set(None);
            return None;
        }
        let (generation, cx) = self.inner.begin(None);
        Rc::clone(&self.inner).run_check(value, cx, generation).await
    }

    /// Cancel outstanding work and clear `loading` and `error`.
    pub fn reset(&self) {
        self.inner.cancel();
        self.inner.error.set(None);
    }

    /// Cancel outstanding work, keeping the last verdict. Returns whether a
    /// session was active.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Whether a timer or check is outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.session.borrow().is_some()
    }

    /// Cell holding the latest committed verdict.
    #[must_use]
    pub fn error(&self) -> &Observable<Option<String>> {
        &self.inner.error
    }

    /// Cell that is `true` while a check is in flight.
    #[must_use]
    pub fn loading(&self) -> &Observable<bool> {
        &self.inner.loading
    }

    #[must_use]
    pub fn field(&self) -> &str {
        &self.inner.field
    }
}
