//! Reference field kinds.
//!
//! Concrete field kinds belong to an external library; these two exist so
//! the engine has something realistic to drive in tests and demos.

use crate::contract::{FieldContract, Validation};
use crate::value::{Value, exact_i64};

const REQUIRED: &str = "This field is required";

/// Free text with optional required/length constraints.
#[derive(Debug, Clone, Default)]
pub struct TextField {
    required: bool,
    min_len: Option<usize>,
    max_len: Option<usize>,
}

impl TextField {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn min_len(mut self, n: usize) -> Self {
        self.min_len = Some(n);
        self
    }

    #[must_use]
    pub fn max_len(mut self, n: usize) -> Self {
        self.max_len = Some(n);
        self
    }
}

impl FieldContract for TextField {
    fn validate(&self, raw: &Value) -> Validation {
        if raw.is_empty() {
            return if self.required {
                Validation::fail(REQUIRED)
            } else {
                Validation::ok()
            };
        }
        let Some(text) = raw.to_text() else {
            return Validation::fail("Expected text");
        };
        let len = text.chars().count();
        if let Some(min) = self.min_len
            && len < min
        {
            return Validation::fail(format!("Must be at least {min} characters"));
        }
        if let Some(max) = self.max_len
            && len > max
        {
            return Validation::fail(format!("Must be at most {max} characters"));
        }
        Validation::ok()
    }

    fn transform_input(&self, raw: &Value) -> Option<Value> {
        if raw.is_null() {
            return Some(Value::Null);
        }
        if let Some(text) = raw.to_text() {
            return Some(Value::Text(text.trim().to_owned()));
        }
        match raw {
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => Some(Value::Text(raw.to_string())),
            _ => None,
        }
    }
}

/// Integer or decimal number with optional bounds.
#[derive(Debug, Clone, Default)]
pub struct NumberField {
    integer: bool,
    required: bool,
    min: Option<f64>,
    max: Option<f64>,
    decimals: Option<usize>,
}

impl NumberField {
    /// A whole-number field.
    #[must_use]
    pub fn integer() -> Self {
        Self {
            integer: true,
            ..Self::default()
        }
    }

    /// A decimal field.
    #[must_use]
    pub fn decimal() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    #[must_use]
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Fixed number of decimals used by `format`.
    #[must_use]
    pub fn decimals(mut self, n: usize) -> Self {
        self.decimals = Some(n);
        self
    }

    fn parse(raw: &Value) -> Option<f64> {
        raw.as_f64()
            .or_else(|| raw.to_text().and_then(|s| s.trim().parse::<f64>().ok()))
            .filter(|n| n.is_finite())
    }
}

impl FieldContract for NumberField {
    fn validate(&self, raw: &Value) -> Validation {
        if raw.is_empty() {
            return if self.required {
                Validation::fail(REQUIRED)
            } else {
                Validation::ok()
            };
        }
        let Some(n) = Self::parse(raw) else {
            return Validation::fail("Must be a number");
        };
        if self.integer && n.fract() != 0.0 {
            return Validation::fail("Must be a whole number");
        }
        if self.integer && exact_i64(n).is_none() {
            return Validation::fail("Number is too large");
        }
        if let Some(min) = self.min
            && n < min
        {
            return Validation::fail(format!("Must be at least {min}"));
        }
        if let Some(max) = self.max
            && n > max
        {
            return Validation::fail(format!("Must be at most {max}"));
        }
        Validation::ok()
    }

    fn transform_input(&self, raw: &Value) -> Option<Value> {
        if raw.is_empty() {
            return Some(Value::Null);
        }
        let n = Self::parse(raw)?;
        if self.integer {
            exact_i64(n).map(Value::Int)
        } else {
            Some(Value::Float(n))
        }
    }

    fn format(&self, value: &Value) -> String {
        match (Self::parse(value), self.decimals) {
            (Some(n), Some(d)) => format!("{n:.d$}"),
            (Some(n), None) if self.integer => {
                exact_i64(n).map_or_else(|| n.to_string(), |i| i.to_string())
            }
            (Some(n), None) => n.to_string(),
            (None, _) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_required_and_lengths() {
        let field = TextField::new().required().min_len(2).max_len(4);
        assert_eq!(
            field.validate(&Value::Null).error_message.as_deref(),
            Some(REQUIRED)
        );
        assert!(!field.validate(&"a".into()).valid);
        assert!(field.validate(&"abc".into()).valid);
        assert!(!field.validate(&"abcde".into()).valid);
        assert!(!field.validate(&Value::List(vec![Value::Int(1)])).valid);
    }

    #[test]
    fn optional_text_accepts_empty() {
        assert!(TextField::new().validate(&"".into()).valid);
    }

    #[test]
    fn text_transform_trims_and_stringifies() {
        let field = TextField::new();
        assert_eq!(field.transform_input(&" hi ".into()), Some("hi".into()));
        assert_eq!(field.transform_input(&Value::Int(4)), Some("4".into()));
        assert_eq!(field.transform_input(&Value::Null), Some(Value::Null));
        assert_eq!(field.transform_input(&Value::List(vec![])), None);
    }

    #[test]
    fn integer_rules() {
        let qty = NumberField::integer().min(1.0);
        assert!(qty.validate(&Value::Int(5)).valid);
        assert!(qty.validate(&"7".into()).valid);
        assert!(!qty.validate(&Value::Float(2.5)).valid);
        assert!(!qty.validate(&Value::Int(0)).valid);
        assert!(!qty.validate(&"abc".into()).valid);
        assert_eq!(qty.transform_input(&"12".into()), Some(Value::Int(12)));
        assert_eq!(qty.transform_input(&Value::Float(1.5)), None);
        assert!(!qty.validate(&Value::Float(1e19)).valid);
        assert_eq!(qty.transform_input(&"1e19".into()), None);
        assert_eq!(NumberField::integer().format(&Value::Float(1e19)), "10000000000000000000");
    }

    #[test]
    fn decimal_rules_and_format() {
        let price = NumberField::decimal().max(1000.0).decimals(2);
        assert!(price.validate(&Value::Float(99.5)).valid);
        assert!(!price.validate(&Value::Int(1001)).valid);
        assert_eq!(price.transform_input(&"3.25".into()), Some(Value::Float(3.25)));
        assert_eq!(price.format(&Value::Int(100)), "100.00");
        assert_eq!(NumberField::integer().format(&Value::Float(3.0)), "3");
        assert_eq!(price.format(&Value::Null), "");
    }
}
