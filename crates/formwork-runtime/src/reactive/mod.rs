#![forbid(unsafe_code)]

//! Reactive primitives the form engine is built on.
//!
//! - [`Observable`]: a shared, version-tracked value with change
//!   notification.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Computed`]: a lazily evaluated, memoized value derived from any set of
//!   [`Trigger`] sources; itself a `Trigger`.
//! - [`Effect`]: a callback re-run whenever its sources change, until
//!   disposed.
//! - [`BatchScope`]: RAII guard that defers notifications until the scope
//!   exits.
//!
//! # Architecture
//!
//! Everything is single-threaded: `Rc<RefCell<..>>` for shared ownership,
//! `Weak` callback lists cleaned up lazily during notification. Computeds
//! are pull-based (dirty flag + recompute on read); effects are push-based
//! (run on notification). Dependencies are explicit lists of sources, not
//! implicit read tracking.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current value is a no-op.
//! 4. `Computed::get()` never returns a stale value.
//! 5. A disposed `Effect` never runs again.

pub mod batch;
pub mod computed;
pub mod effect;
pub mod observable;

pub use batch::{BatchScope, batch, is_batching};
pub use computed::Computed;
pub use effect::Effect;
pub use observable::{Observable, Subscription, Trigger};
