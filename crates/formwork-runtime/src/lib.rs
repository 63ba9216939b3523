#![forbid(unsafe_code)]

//! Runtime for formwork: reactive field state, dependency resolution, async
//! validation, undo history, and the form aggregator that ties them
//! together.
//!
//! # Role in formwork
//! `formwork-runtime` owns every piece of mutable form state. It builds on
//! the value model and field contracts from `formwork-core` and is
//! re-exported by the `formwork` facade.
//!
//! # Threading
//! The engine is single-threaded (`Rc`/`RefCell`). Asynchronous work
//! (debounce timers, async validators) runs as tokio local tasks and needs
//! a [`tokio::task::LocalSet`] on a current-thread runtime.
//!
//! # Example
//!
//! ```
//! use formwork_core::kinds::NumberField;
//! use formwork_core::{FieldDescriptor, Value};
//! use formwork_runtime::{DependencyRule, FieldConfig, Form};
//!
//! let form = Form::builder()
//!     .field(FieldDescriptor::new("price", NumberField::decimal()))
//!     .field(FieldDescriptor::new("qty", NumberField::integer()))
//!     .field_with(
//!         FieldDescriptor::new("total", NumberField::decimal()),
//!         FieldConfig::new().readonly().depends(
//!             DependencyRule::new(["price", "qty"]).compute(|v| {
//!                 let n = |k: &str| v.get(k).and_then(Value::as_f64).unwrap_or(0.0);
//!                 Value::Float(n("price") * n("qty"))
//!             }),
//!         ),
//!     )
//!     .build()?;
//!
//! form.set_value("price", 100.0)?;
//! form.set_value("qty", 5)?;
//! assert_eq!(form.field("total").unwrap().value().get(), Value::Float(500.0));
//! # Ok::<(), formwork_core::FormError>(())
//! ```

pub mod async_validation;
pub mod config;
pub mod dependency;
pub mod field;
pub mod form;
pub mod history;
pub mod reactive;

pub use async_validation::{AsyncValidation, AsyncValidatorFn, ValidatorFuture, async_validator};
pub use config::{FormConfig, HistoryConfig};
pub use dependency::{DependencyContext, DependencyHost, DependencyResolver, DependencyRule};
pub use field::FieldState;
pub use form::{CrossFieldRule, ErrorMap, FieldConfig, Form, FormBuilder};
pub use history::{History, HistoryEntry, HistoryManager};
pub use reactive::{BatchScope, Computed, Effect, Observable, Subscription, Trigger, batch};
