//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Parameter validation pluggable.
//!
//! Action descriptors may carry a parameter schema, opaque to the broker
//! core. The configured [`Validator`] compiles each schema once at action
//! registration; the compiled checker runs against the params of every
//! invocation that executes locally.
//!
//! The built-in [`SchemaValidator`] understands a small field/type schema
//! language. Embedders with richer needs (ranges, patterns, coercion)
//! supply their own `Validator`.

use crate::error::BrokerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// One schema violation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ValidationIssue {
    /// The offending parameter field.
    pub field: String,
    /// The expected type or constraint.
    pub expected: String,
    /// Human-readable description.
    pub message: String,
}

/// A compiled parameter checker.
pub trait CompiledCheck: Send + Sync {
    /// Checks params against the compiled schema.
    ///
    /// # Errors
    ///
    /// Returns the list of violations when the params do not satisfy the
    /// schema.
    fn check(&self, params: &Value) -> Result<(), Vec<ValidationIssue>>;
}

/// Compiles parameter schemas into checkers.
///
/// Compilation happens once, at action registration; checking happens per
/// invocation and must be cheap.
pub trait Validator: Send + Sync + 'static {
    /// Compiles a schema.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Custom`] when the schema itself is
    /// malformed. A bad schema is a programming error in the service
    /// definition and is surfaced at registration, not at call time.
    fn compile(&self, schema: &Value) -> Result<Arc<dyn CompiledCheck>, BrokerError>;
}

/// Field rule inside a compiled [`SchemaValidator`] schema.
#[derive(Clone, Debug)]
struct FieldRule {
    field: String,
    expected: ExpectedType,
    optional: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ExpectedType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ExpectedType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

struct CompiledFieldSchema {
    rules: Vec<FieldRule>,
}

impl CompiledCheck for CompiledFieldSchema {
    fn check(&self, params: &Value) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        let map = match params {
            Value::Object(map) => map,
            other => {
                // A schema with no rules accepts anything.
                if self.rules.is_empty() {
                    return Ok(());
                }
                return Err(vec![ValidationIssue {
                    field: String::new(),
                    expected: "object".to_string(),
                    message: format!("params must be an object, got {}", type_name(other)),
                }]);
            }
        };
        for rule in &self.rules {
            match map.get(&rule.field) {
                None | Some(Value::Null) if rule.optional => {}
                None | Some(Value::Null) => issues.push(ValidationIssue {
                    field: rule.field.clone(),
                    expected: rule.expected.name().to_string(),
                    message: format!("field '{}' is required", rule.field),
                }),
                Some(value) if rule.expected.matches(value) => {}
                Some(value) => issues.push(ValidationIssue {
                    field: rule.field.clone(),
                    expected: rule.expected.name().to_string(),
                    message: format!(
                        "field '{}' must be a {}, got {}",
                        rule.field,
                        rule.expected.name(),
                        type_name(value)
                    ),
                }),
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The built-in field/type schema validator.
///
/// Schemas are JSON objects mapping field names to either a type name or
/// an object with `type` and an optional `optional` flag:
///
/// ```json
/// {
///     "a": "number",
///     "b": "number",
///     "note": { "type": "string", "optional": true }
/// }
/// ```
///
/// Supported types: `string`, `number`, `boolean`, `object`, `array`,
/// `any`.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use swarmbus::validator::{SchemaValidator, Validator};
///
/// let validator = SchemaValidator::default();
/// let check = validator
///     .compile(&json!({ "a": "number", "b": "number" }))
///     .unwrap();
///
/// assert!(check.check(&json!({ "a": 1, "b": 2 })).is_ok());
/// assert!(check.check(&json!({ "a": "one" })).is_err());
/// ```
#[derive(Clone, Debug, Default)]
pub struct SchemaValidator;

impl Validator for SchemaValidator {
    fn compile(&self, schema: &Value) -> Result<Arc<dyn CompiledCheck>, BrokerError> {
        let map = schema.as_object().ok_or_else(|| {
            BrokerError::custom("InvalidSchema", "parameter schema must be an object")
        })?;
        let mut rules = Vec::with_capacity(map.len());
        for (field, spec) in map {
            let (type_name, optional) = match spec {
                Value::String(name) => (name.as_str(), false),
                Value::Object(obj) => (
                    obj.get("type").and_then(Value::as_str).unwrap_or("any"),
                    obj.get("optional").and_then(Value::as_bool).unwrap_or(false),
                ),
                _ => {
                    return Err(BrokerError::custom(
                        "InvalidSchema",
                        format!("rule for field '{field}' must be a type name or object"),
                    ));
                }
            };
            let expected = ExpectedType::parse(type_name).ok_or_else(|| {
                BrokerError::custom(
                    "InvalidSchema",
                    format!("unknown type '{type_name}' for field '{field}'"),
                )
            })?;
            rules.push(FieldRule {
                field: field.clone(),
                expected,
                optional,
            });
        }
        Ok(Arc::new(CompiledFieldSchema { rules }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_matching_params() {
        let check = SchemaValidator
            .compile(&json!({ "a": "number", "name": "string" }))
            .unwrap();
        assert!(check.check(&json!({ "a": 3, "name": "x" })).is_ok());
    }

    #[test]
    fn test_reports_missing_required_field() {
        let check = SchemaValidator.compile(&json!({ "a": "number" })).unwrap();
        let issues = check.check(&json!({})).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "a");
        assert!(issues[0].message.contains("required"));
    }

    #[test]
    fn test_reports_type_mismatch() {
        let check = SchemaValidator.compile(&json!({ "a": "number" })).unwrap();
        let issues = check.check(&json!({ "a": "three" })).unwrap_err();
        assert_eq!(issues[0].expected, "number");
    }

    #[test]
    fn test_optional_field_may_be_absent() {
        let check = SchemaValidator
            .compile(&json!({ "note": { "type": "string", "optional": true } }))
            .unwrap();
        assert!(check.check(&json!({})).is_ok());
        assert!(check.check(&json!({ "note": "hi" })).is_ok());
        assert!(check.check(&json!({ "note": 5 })).is_err());
    }

    #[test]
    fn test_extra_fields_are_allowed() {
        let check = SchemaValidator.compile(&json!({ "a": "number" })).unwrap();
        assert!(check.check(&json!({ "a": 1, "extra": true })).is_ok());
    }

    #[test]
    fn test_rejects_malformed_schema() {
        assert!(SchemaValidator.compile(&json!("not a schema")).is_err());
        assert!(SchemaValidator.compile(&json!({ "a": "no-such-type" })).is_err());
    }

    #[test]
    fn test_non_object_params_rejected_when_rules_exist() {
        let check = SchemaValidator.compile(&json!({ "a": "number" })).unwrap();
        let issues = check.check(&json!([1, 2, 3])).unwrap_err();
        assert!(issues[0].message.contains("object"));
    }
}

// Made with Bob
