//! Input validation against a capability's `inputSchema`.
//!
//! Each descriptor's schema is compiled once, when the capability is
//! registered; every direct call is checked against the compiled validator
//! before its input is detokenized.

use serde_json::{Map, Value};

/// Reasons reported per rejected input.
const MAX_REPORTED_ERRORS: usize = 3;

/// `null` input counts as `{}` for object schemas.
pub fn normalize_input(schema: &Value, input: Value) -> Value {
    if input.is_null() && expects_object(schema) {
        Value::Object(Map::new())
    } else {
        input
    }
}

fn expects_object(schema: &Value) -> bool {
    match schema.get("type") {
        Some(Value::String(s)) => s == "object",
        Some(Value::Array(items)) => items.iter().any(|t| t == "object"),
        Some(_) => false,
        None => schema.get("properties").is_some() || schema.get("required").is_some(),
    }
}

/// A compiled `inputSchema`.
pub struct InputValidator {
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for InputValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputValidator").finish_non_exhaustive()
    }
}

impl InputValidator {
    /// `Err` carries the compile error when `schema` is not a valid JSON Schema.
    pub fn new(schema: &Value) -> Result<Self, String> {
        let validator = jsonschema::options()
            .build(schema)
            .map_err(|e| e.to_string())?;
        Ok(Self { validator })
    }

    /// `Err` lists the first few violations.
    pub fn validate(&self, input: &Value) -> Result<(), String> {
        let reasons: Vec<String> = self
            .validator
            .iter_errors(input)
            .take(MAX_REPORTED_ERRORS)
            .map(|e| e.to_string())
            .collect();
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contact_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "email": {"type": "string"},
                "limit": {"type": "integer"},
                "tags": {"type": ["array", "null"], "items": {"type": "string"}}
            },
            "required": ["email"]
        })
    }

    #[test]
    fn test_valid_input() {
        let v = InputValidator::new(&contact_schema()).unwrap();
        assert!(v.validate(&json!({"email": "a@b.co"})).is_ok());
        assert!(v.validate(&json!({"email": "a", "limit": 3, "tags": null})).is_ok());
        assert!(v.validate(&json!({"email": "a", "tags": ["x", "y"]})).is_ok());
        assert!(v.validate(&json!({"email": "a", "extra": {"any": 1}})).is_ok());
    }

    #[test]
    fn test_invalid_input() {
        let v = InputValidator::new(&contact_schema()).unwrap();
        assert!(v.validate(&json!({})).unwrap_err().contains("email"));
        assert!(v.validate(&json!({"email": 5})).unwrap_err().contains("string"));
        assert!(v.validate(&json!({"email": "a", "limit": 1.5})).is_err());
        assert!(v.validate(&json!({"email": "a", "tags": [1]})).is_err());
        assert!(v.validate(&json!("a@b.co")).is_err());
    }

    #[test]
    fn test_nested_enum_and_additional_properties() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "mode": {"enum": ["read", "write"]},
                "addr": {
                    "type": "object",
                    "required": ["zip"],
                    "properties": {"zip": {"type": "string"}}
                }
            }
        });
        let v = InputValidator::new(&schema).unwrap();
        assert!(v
            .validate(&json!({"mode": "read", "addr": {"zip": "94107"}}))
            .is_ok());
        assert!(v.validate(&json!({"mode": "drop_table"})).is_err());
        assert!(v.validate(&json!({"addr": {"zip": 5}})).is_err());
        assert!(v.validate(&json!({"addr": {}})).is_err());
        assert!(v.validate(&json!({"extra": 1})).is_err());

        let reasons = v
            .validate(&json!({"mode": "drop_table", "addr": {"zip": 5}, "extra": 1}))
            .unwrap_err();
        assert_eq!(reasons.split("; ").count(), 3, "{}", reasons);
    }

    #[test]
    fn test_invalid_schema_rejected() {
        assert!(InputValidator::new(&json!({"type": "no-such-type"})).is_err());
        assert!(InputValidator::new(&json!({})).is_ok());
    }

    #[test]
    fn test_null_normalized_for_object_schema() {
        let s = json!({"type": "object"});
        let input = normalize_input(&s, Value::Null);
        assert_eq!(input, json!({}));
        assert!(InputValidator::new(&s).unwrap().validate(&input).is_ok());
        assert_eq!(normalize_input(&json!({}), Value::Null), Value::Null);
    }
}
