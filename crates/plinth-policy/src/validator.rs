//! Argument validator.
//!
//! The `ArgumentValidator` checks a request's argument map against an
//! [`ActionSpec`]'s schema. Validation is pure: the same inputs always
//! produce the same outcome, and nothing is spawned or recorded.
//!
//! Checks run in this order, stopping at the first failure:
//!
//! 1. **Shape** - no undeclared keys, every required key present
//! 2. **Type** - each value matches its declared [`ArgumentType`]
//! 3. **Constraints** - NUL bytes, `max_length`, `pattern`, `allowed_values`, `min`/`max`

use crate::error::ValidationError;
use plinth_core::action::{ActionSpec, ArgumentSpec, ArgumentType};
use serde_json::Value;
use std::collections::BTreeMap;

/// Validates argument maps against an action's schema.
pub struct ArgumentValidator<'a> {
    spec: &'a ActionSpec,
}

impl<'a> ArgumentValidator<'a> {
    /// Create a validator for one action.
    pub fn new(spec: &'a ActionSpec) -> Self {
        Self { spec }
    }

    /// Validate the full argument map.
    ///
    /// Returns `Ok(())` only if the map satisfies the schema exactly.
    pub fn validate(&self, arguments: &BTreeMap<String, Value>) -> Result<(), ValidationError> {
        let result = self.check(arguments);
        if let Err(err) = &result {
            tracing::debug!(
                action = %self.spec.name,
                kind = ?err.kind,
                argument = ?err.argument,
                "Arguments rejected"
            );
        }
        result
    }

    fn check(&self, arguments: &BTreeMap<String, Value>) -> Result<(), ValidationError> {
        // 1. Reject anything the schema does not declare
        for key in arguments.keys() {
            if self.spec.argument(key).is_none() {
                return Err(ValidationError::unexpected_argument(&self.spec.name, key));
            }
        }

        // 2. Walk the schema in declaration order
        for arg in &self.spec.argument_schema {
            match arguments.get(&arg.name) {
                None if arg.required => {
                    return Err(ValidationError::missing_argument(&self.spec.name, &arg.name));
                }
                None => {}
                Some(value) => self.validate_value(arg, value)?,
            }
        }

        Ok(())
    }

    /// Validate a single value against its schema entry.
    pub fn validate_value(&self, arg: &ArgumentSpec, value: &Value) -> Result<(), ValidationError> {
        if !arg.arg_type.matches(value) {
            return Err(ValidationError::type_mismatch(
                &arg.name,
                &arg.arg_type.to_string(),
                value,
            ));
        }

        match arg.arg_type {
            ArgumentType::String => {
                if let Some(s) = value.as_str() {
                    self.validate_string(arg, s)?;
                }
            }
            ArgumentType::StringList => {
                let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
                if let Some(max) = arg.max_length {
                    if items.len() > max {
                        return Err(ValidationError::too_long(&arg.name, items.len(), max));
                    }
                }
                for item in items.iter().filter_map(Value::as_str) {
                    self.validate_list_item(arg, item)?;
                }
            }
            ArgumentType::Integer | ArgumentType::Number => {
                self.validate_range(arg, value)?;
            }
            ArgumentType::Boolean => {}
        }

        if let Some(allowed) = &arg.allowed_values {
            if !allowed.contains(value) {
                return Err(ValidationError::value_not_allowed(&arg.name, allowed));
            }
        }

        Ok(())
    }

    fn validate_string(&self, arg: &ArgumentSpec, s: &str) -> Result<(), ValidationError> {
        if s.contains('\0') {
            return Err(ValidationError::contains_nul(&arg.name));
        }
        if let Some(max) = arg.max_length {
            let length = s.chars().count();
            if length > max {
                return Err(ValidationError::too_long(&arg.name, length, max));
            }
        }
        if let Some(pattern) = &arg.pattern {
            if !pattern.is_match(s) {
                return Err(ValidationError::pattern_mismatch(&arg.name, pattern.as_str()));
            }
        }
        Ok(())
    }

    // max_length on a list bounds the element count, not element length.
    fn validate_list_item(&self, arg: &ArgumentSpec, s: &str) -> Result<(), ValidationError> {
        if s.contains('\0') {
            return Err(ValidationError::contains_nul(&arg.name));
        }
        if let Some(pattern) = &arg.pattern {
            if !pattern.is_match(s) {
                return Err(ValidationError::pattern_mismatch(&arg.name, pattern.as_str()));
            }
        }
        Ok(())
    }

    fn validate_range(&self, arg: &ArgumentSpec, value: &Value) -> Result<(), ValidationError> {
        let Some(n) = value.as_f64() else {
            return Ok(());
        };
        let below = arg.min.is_some_and(|min| n < min);
        let above = arg.max.is_some_and(|max| n > max);
        if below || above {
            return Err(ValidationError::out_of_range(&arg.name, value, arg.min, arg.max));
        }
        Ok(())
    }
}
