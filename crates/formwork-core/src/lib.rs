#![forbid(unsafe_code)]

//! Core: value model, cancellation context, field contracts, and errors.
//!
//! Everything here is independent of the reactive runtime. The runtime crate
//! builds field state, dependency resolution, async validation and history
//! on top of these types.

pub mod contract;
pub mod cx;
pub mod error;
pub mod kinds;
pub mod value;

pub use contract::{FieldContract, FieldDescriptor, FnContract, Validation};
pub use cx::{Cx, CxController, CxError};
pub use error::{AsyncCheckError, FormError, Result};
pub use value::{Snapshot, Value, ValueMap, deep_equal, maps_equal, value_map};
