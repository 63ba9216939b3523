//! Cancellation context (`Cx`) for asynchronous field validation.
//!
//! Every asynchronous check the engine issues receives a `Cx`. The check may
//! poll [`Cx::is_cancelled`] at its own await points, and the engine checks
//! the same token after the check resolves: a result whose token was
//! cancelled in the meantime is discarded and never touches form state.
//!
//! Contexts form a tree. A form owns one root context; every validation
//! session is a child of it, so cancelling the root (on `destroy`) cancels
//! every outstanding session at once. A child may carry its own deadline,
//! which the validator can consult through [`Cx::remaining`].
//!
//! # Example
//!
//! ```
//! use formwork_core::cx::Cx;
//!
//! let (root, root_ctrl) = Cx::background();
//! let (session, _session_ctrl) = root.child_inherit();
//! assert!(!session.is_cancelled());
//!
//! root_ctrl.cancel();
//! assert!(session.is_cancelled());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use web_time::{Duration, Instant};

use tracing::trace;

static NEXT_CX_ID: AtomicU64 = AtomicU64::new(1);

fn next_cx_id() -> u64 {
    NEXT_CX_ID.fetch_add(1, Ordering::Relaxed)
}

/// Total number of context cancellations observed in this process.
static CANCELLATIONS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Read the total cancellation count (diagnostics only).
#[must_use]
pub fn cancellations_total() -> u64 {
    CANCELLATIONS_TOTAL.load(Ordering::Relaxed)
}

#[derive(Debug)]
struct CxInner {
    id: u64,
    cancelled: AtomicBool,
    /// Deadline as an instant; `None` means no own deadline.
    deadline: Option<Instant>,
    parent: Option<Arc<CxInner>>,
}

impl CxInner {
    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Tightest deadline along the parent chain.
    fn effective_deadline(&self) -> Option<Instant> {
        let parent = self.parent.as_ref().and_then(|p| p.effective_deadline());
        match (self.deadline, parent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Cancellation token handed to asynchronous work.
///
/// Cheaply cloneable; all clones observe the same cancellation.
#[derive(Clone, Debug)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Cx {
    /// Create a root context with no deadline.
    #[must_use]
    pub fn background() -> (Self, CxController) {
        Self::new_inner(None, None)
    }

    /// Create a root context that expires after `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Duration) -> (Self, CxController) {
        Self::new_inner(Some(Instant::now() + deadline), None)
    }

    /// Derive a child context with its own deadline.
    ///
    /// Cancelling the parent also cancels the child.
    #[must_use]
    pub fn child(&self, deadline: Duration) -> (Self, CxController) {
        Self::new_inner(Some(Instant::now() + deadline), Some(Arc::clone(&self.inner)))
    }

    /// Derive a child context that only inherits the parent's deadline.
    #[must_use]
    pub fn child_inherit(&self) -> (Self, CxController) {
        Self::new_inner(None, Some(Arc::clone(&self.inner)))
    }

    fn new_inner(deadline: Option<Instant>, parent: Option<Arc<CxInner>>) -> (Self, CxController) {
        let inner = Arc::new(CxInner {
            id: next_cx_id(),
            cancelled: AtomicBool::new(false),
            deadline,
            parent,
        });
        (
            Self {
                inner: Arc::clone(&inner),
            },
            CxController { inner },
        )
    }

    /// Unique identifier for this context (for logging).
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether this context or any ancestor has been cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Whether the effective deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|d| d.is_zero())
    }

    /// Cancelled or expired.
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// Time left before the effective deadline, saturating at zero.
    /// `None` when no deadline applies.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .effective_deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Return `Err` if the context is cancelled or expired.
    ///
    /// Intended for use after await points:
    /// ```ignore
    /// let answer = lookup(value).await;
    /// cx.check()?;
    /// ```
    pub fn check(&self) -> Result<(), CxError> {
        if self.is_cancelled() {
            return Err(CxError::Cancelled);
        }
        if self.is_expired() {
            return Err(CxError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Owner handle for a [`Cx`].
///
/// Dropping the controller does **not** cancel the context; cancellation is
/// always explicit.
#[derive(Debug)]
pub struct CxController {
    inner: Arc<CxInner>,
}

impl CxController {
    /// Cancel the associated context and every context derived from it.
    pub fn cancel(&self) {
        let was_cancelled = self.inner.cancelled.swap(true, Ordering::Release);
        if !was_cancelled {
            CANCELLATIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
            trace!(cx_id = self.inner.id, "cx cancelled");
        }
    }

    /// Whether this context itself has been cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// A fresh token handle for the controlled context.
    #[must_use]
    pub fn cx(&self) -> Cx {
        Cx {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Error returned when work is abandoned through its `Cx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CxError {
    /// The context was explicitly cancelled.
    #[error("context cancelled")]
    Cancelled,
    /// The context deadline expired.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}
