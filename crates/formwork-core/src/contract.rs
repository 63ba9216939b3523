//! The field contract: the only seam between the engine and field kinds.
//!
//! The engine never inspects kind-specific logic. For every field it calls
//! exactly three operations: [`FieldContract::validate`],
//! [`FieldContract::transform_input`] and [`FieldContract::format`].

use std::fmt;
use std::rc::Rc;

use crate::value::Value;

/// Result of validating a raw value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Validation {
    pub valid: bool,
    pub error_message: Option<String>,
}

impl Validation {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            error_message: None,
        }
    }

    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error_message: Some(message.into()),
        }
    }

    /// The message to show, if invalid. Falls back to a generic message when
    /// the contract did not supply one.
    #[must_use]
    pub fn into_error(self) -> Option<String> {
        if self.valid {
            None
        } else {
            Some(self.error_message.unwrap_or_else(|| "Invalid value".to_owned()))
        }
    }
}

/// Per-field validation and transforms supplied by a field kind.
pub trait FieldContract {
    /// Validate an untrusted raw value.
    fn validate(&self, raw: &Value) -> Validation;

    /// Convert untrusted input into the field's type; `None` when the input
    /// cannot be represented.
    fn transform_input(&self, raw: &Value) -> Option<Value>;

    /// Display string for a value of this field.
    fn format(&self, value: &Value) -> String {
        value.to_string()
    }
}

type ValidateFn = dyn Fn(&Value) -> Validation;
type TransformFn = dyn Fn(&Value) -> Option<Value>;
type FormatFn = dyn Fn(&Value) -> String;

/// A contract assembled from closures.
///
/// Missing pieces default to "always valid", identity transform, and
/// `Display` formatting.
#[derive(Clone, Default)]
pub struct FnContract {
    validate: Option<Rc<ValidateFn>>,
    transform: Option<Rc<TransformFn>>,
    format: Option<Rc<FormatFn>>,
}

impl FnContract {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_validate(mut self, f: impl Fn(&Value) -> Validation + 'static) -> Self {
        self.validate = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn with_transform(mut self, f: impl Fn(&Value) -> Option<Value> + 'static) -> Self {
        self.transform = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn with_format(mut self, f: impl Fn(&Value) -> String + 'static) -> Self {
        self.format = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for FnContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnContract")
            .field("validate", &self.validate.is_some())
            .field("transform", &self.transform.is_some())
            .field("format", &self.format.is_some())
            .finish()
    }
}

impl FieldContract for FnContract {
    fn validate(&self, raw: &Value) -> Validation {
        self.validate.as_ref().map_or_else(Validation::ok, |f| f(raw))
    }

    fn transform_input(&self, raw: &Value) -> Option<Value> {
        match &self.transform {
            Some(f) => f(raw),
            None => Some(raw.clone()),
        }
    }

    fn format(&self, value: &Value) -> String {
        self.format
            .as_ref()
            .map_or_else(|| value.to_string(), |f| f(value))
    }
}

/// Identity of a field plus its contract. Immutable once built.
#[derive(Clone)]
pub struct FieldDescriptor {
    name: String,
    contract: Rc<dyn FieldContract>,
}

impl FieldDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, contract: impl FieldContract + 'static) -> Self {
        Self {
            name: name.into(),
            contract: Rc::new(contract),
        }
    }

    /// Build from an already shared contract.
    #[must_use]
    pub fn from_shared(name: impl Into<String>, contract: Rc<dyn FieldContract>) -> Self {
        Self {
            name: name.into(),
            contract,
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
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
