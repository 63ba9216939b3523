#![forbid(unsafe_code)]

//! formwork public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users. The
//! value model and field contracts live in `formwork-core`; the reactive
//! form engine lives in `formwork-runtime` (behind the default `runtime`
//! feature).

pub use formwork_core::{
    AsyncCheckError, Cx, CxController, FieldContract, FieldDescriptor, FnContract, FormError,
    Result, Snapshot, Validation, Value, ValueMap, deep_equal, value_map,
};

#[cfg(feature = "runtime")]
pub use formwork_runtime::{
    CrossFieldRule, DependencyRule, FieldConfig, FieldState, Form, FormBuilder, FormConfig,
    HistoryConfig,
};

pub mod prelude {
    pub use formwork_core as core;
    pub use formwork_core::kinds;
    #[cfg(feature = "runtime")]
    pub use formwork_runtime as runtime;

    pub use formwork_core::{FieldDescriptor, FormError, Value, ValueMap, value_map};
    #[cfg(feature = "runtime")]
    pub use formwork_runtime::{
        CrossFieldRule, DependencyRule, FieldConfig, Form, FormConfig, HistoryConfig,
        async_validator,
    };
}
