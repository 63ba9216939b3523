#![forbid(unsafe_code)]

//! Per-field reactive state.
//!
//! A [`FieldState`] owns the writable cells of one field (`value`,
//! `initial`, `touched`, `visible`, `enabled`) and derives the rest from
//! them through the field's [`FieldContract`]:
//!
//! | cell          | derived from            | meaning                                  |
//! |---------------|-------------------------|------------------------------------------|
//! | `validation`  | `value`                 | raw contract verdict, never gated        |
//! | `error`       | `validation`, `touched` | message shown to the user; `None` until touched |
//! | `valid`       | `error`                 | `error.is_none()`                        |
//! | `dirty`       | `value`, `initial`      | value differs from initial (deep, cycle-safe) |
//!
//! Form-level validity uses `validation`, not `error`: an untouched invalid
//! field hides its message but still makes the form invalid.

use std::fmt;
use std::rc::Rc;

use formwork_core::{FieldContract, FieldDescriptor, Snapshot, Validation, Value, deep_equal};

use crate::async_validation::AsyncValidation;
use crate::reactive::{BatchScope, Computed, Observable};

/// Reactive state of one form field.
pub struct FieldState {
    name: String,
    contract: Rc<dyn FieldContract>,
    value: Observable<Value>,
    initial: Observable<Value>,
    touched: Observable<bool>,
    visible: Observable<bool>,
    enabled: Observable<bool>,
    readonly: bool,
    validation: Computed<Validation>,
    error: Computed<Option<String>>,
    valid: Computed<bool>,
    dirty: Computed<bool>,
    async_validation: Option<AsyncValidation>,
}

impl fmt::Debug for FieldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldState")
            .field("name", &self.name)
            .field("value", &self.value.get())
            .field("touched", &self.touched.get())
            .field("readonly", &self.readonly)
            .field("async", &self.async_validation.is_some())
            .finish()
    }
}

impl FieldState {
    pub fn new(
        descriptor: &FieldDescriptor,
        initial: Value,
        readonly: bool,
        async_validation: Option<AsyncValidation>,
    ) -> Self {
        let contract = Rc::clone(descriptor.contract());
        let value = Observable::new(initial.snapshot());
        let initial = Observable::new(initial);
        let touched = Observable::new(false);

        let validation = {
            let (contract, raw) = (Rc::clone(&contract), value.clone());
            Computed::from_sources(&[&value], move || raw.with(|raw| contract.validate(raw)))
        };
        let error = {
            let (verdict, seen) = (validation.clone(), touched.clone());
            Computed::from_sources(&[&validation, &touched], move || {
                if seen.get() {
                    verdict.get().into_error()
                } else {
                    None
                }
            })
        };
        let valid = {
            let shown = error.clone();
            Computed::from_sources(&[&error], move || shown.with(Option::is_none))
        };
        let dirty = {
            let (current, init) = (value.clone(), initial.clone());
            Computed::from_sources(&[&value, &initial], move || {
                current.with(|current| init.with(|init| !deep_equal(current, init)))
            })
        };

        Self {
            name: descriptor.name().to_owned(),
            contract,
            value,
            initial,
            touched,
            visible: Observable::new(true),
            enabled: Observable::new(true),
            readonly,
            validation,
            error,
            valid,
            dirty,
            async_validation,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn contract(&self) -> &Rc<dyn FieldContract> {
        &self.contract
    }

    /// Current value cell. Writes through this handle bypass the read-only
    /// check and history; prefer `Form::set_value`.
    #[must_use]
    pub fn value(&self) -> &Observable<Value> {
        &self.value
    }

    #[must_use]
    pub fn initial(&self) -> &Observable<Value> {
        &self.initial
    }

    #[must_use]
    pub fn touched(&self) -> &Observable<bool> {
        &self.touched
    }

    /// Written by the dependency resolver; `true` unless a `show_when` rule
    /// says otherwise.
    #[must_use]
    pub fn visible(&self) -> &Observable<bool> {
        &self.visible
    }

    #[must_use]
    pub fn enabled(&self) -> &Observable<bool> {
        &self.enabled
    }

    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Ungated contract verdict for the current value.
    #[must_use]
    pub fn validation(&self) -> &Computed<Validation> {
        &self.validation
    }

    /// Synchronous error, hidden until the field is touched.
    #[must_use]
    pub fn error(&self) -> &Computed<Option<String>> {
        &self.error
    }

    #[must_use]
    pub fn valid(&self) -> &Computed<bool> {
        &self.valid
    }

    /// Whether the current value passes the contract, touched or not.
    #[must_use]
    pub fn value_valid(&self) -> bool {
        self.validation.with(|v| v.valid)
    }

    #[must_use]
    pub fn dirty(&self) -> &Computed<bool> {
        &self.dirty
    }

    #[must_use]
    pub fn async_validation(&self) -> Option<&AsyncValidation> {
        self.async_validation.as_ref()
    }

    /// Latest committed async verdict, if the field has an async validator.
    #[must_use]
    pub fn async_error(&self) -> Option<String> {
        self.async_validation.as_ref().and_then(|a| a.error().get())
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.async_validation
            .as_ref()
            .is_some_and(|a| a.loading().get())
    }

    pub fn touch(&self) {
        self.touched.set(true);
    }

    /// Display string of the current value.
    #[must_use]
    pub fn format(&self) -> String {
        self.value.with(|v| self.contract.format(v))
    }

    /// Value run through the contract pipeline: transformed when it
    /// validates, `Null` otherwise. Always an independent copy.
    #[must_use]
    pub fn trusted_value(&self) -> Value {
        self.value.with(|raw| {
            if self.contract.validate(raw).valid {
                self.contract
                    .transform_input(raw)
                    .map(|v| v.snapshot())
                    .unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        })
    }

    /// Reinstall `initial` as both initial and current value, and clear
    /// `touched`. Async state is left to the caller.
    pub(crate) fn reset_to(&self, initial: Value) {
        let _batch = BatchScope::new();
        self.value.set(initial.snapshot());
        self.initial.set(initial);
        self.touched.set(false);
    }

    /// Put the current value back to a snapshot of `initial`.
    pub(crate) fn revert(&self) {
        let initial = self.initial.with(Snapshot::snapshot);
        let _batch = BatchScope::new();
        self.value.set(initial);
        self.touched.set(false);
    }
}
