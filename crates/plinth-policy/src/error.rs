//! Validation error types for argument enforcement.
//!
//! This module defines the error types used when a request's arguments do
//! not satisfy the action's schema, organized by the kind of violation.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Error type for validation failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    /// The kind of validation error.
    pub kind: ValidationErrorKind,
    /// The offending argument, if the error concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
    /// Human-readable error message.
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            argument: None,
            message: message.into(),
        }
    }

    fn for_argument(
        kind: ValidationErrorKind,
        argument: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            argument: Some(argument.to_string()),
            message: message.into(),
        }
    }

    // =========================================================================
    // SHAPE ERRORS
    // =========================================================================

    /// An argument the schema does not declare.
    pub fn unexpected_argument(action: &str, argument: &str) -> Self {
        Self::for_argument(
            ValidationErrorKind::UnexpectedArgument,
            argument,
            format!("Action '{}' does not accept an argument named '{}'", action, argument),
        )
    }

    /// A required argument that is absent.
    pub fn missing_argument(action: &str, argument: &str) -> Self {
        Self::for_argument(
            ValidationErrorKind::MissingArgument,
            argument,
            format!("Action '{}' requires argument '{}'", action, argument),
        )
    }

    /// A value of the wrong JSON type.
    pub fn type_mismatch(argument: &str, expected: &str, value: &Value) -> Self {
        Self::for_argument(
            ValidationErrorKind::TypeMismatch,
            argument,
            format!(
                "Argument '{}' must be of type {}, got {}",
                argument,
                expected,
                json_type_name(value)
            ),
        )
    }

    // =========================================================================
    // CONSTRAINT ERRORS
    // =========================================================================

    /// A string (or list element) that does not match the declared pattern.
    pub fn pattern_mismatch(argument: &str, pattern: &str) -> Self {
        Self::for_argument(
            ValidationErrorKind::PatternMismatch,
            argument,
            format!("Argument '{}' does not match required pattern: {}", argument, pattern),
        )
    }

    /// A value outside the declared enumeration.
    pub fn value_not_allowed(argument: &str, allowed: &[Value]) -> Self {
        Self::for_argument(
            ValidationErrorKind::ValueNotAllowed,
            argument,
            format!("Argument '{}' is not one of the allowed values: {:?}", argument, allowed),
        )
    }

    /// A string or list that exceeds `max_length`.
    pub fn too_long(argument: &str, length: usize, max: usize) -> Self {
        Self::for_argument(
            ValidationErrorKind::TooLong,
            argument,
            format!("Argument '{}' has length {} which exceeds {}", argument, length, max),
        )
    }

    /// A number outside `min`/`max`.
    pub fn out_of_range(argument: &str, value: &Value, min: Option<f64>, max: Option<f64>) -> Self {
        let bounds = match (min, max) {
            (Some(lo), Some(hi)) => format!("[{}, {}]", lo, hi),
            (Some(lo), None) => format!(">= {}", lo),
            (None, Some(hi)) => format!("<= {}", hi),
            (None, None) => "any".to_string(),
        };
        Self::for_argument(
            ValidationErrorKind::OutOfRange,
            argument,
            format!("Argument '{}' value {} is outside {}", argument, value, bounds),
        )
    }

    /// A string containing a NUL byte, which cannot be passed safely to C programs.
    pub fn contains_nul(argument: &str) -> Self {
        Self::for_argument(
            ValidationErrorKind::ContainsNul,
            argument,
            format!("Argument '{}' contains a NUL byte", argument),
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Categories of validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    // =========================================================================
    // Shape errors
    // =========================================================================
    /// Argument not declared in the schema.
    UnexpectedArgument,
    /// Required argument absent.
    MissingArgument,
    /// Value has the wrong type.
    TypeMismatch,

    // =========================================================================
    // Constraint errors
    // =========================================================================
    /// String does not match the declared pattern.
    PatternMismatch,
    /// Value is not in `allowed_values`.
    ValueNotAllowed,
    /// String or list exceeds `max_length`.
    TooLong,
    /// Number outside `min`/`max`.
    OutOfRange,
    /// String contains a NUL byte.
    ContainsNul,
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
