//! Declared input/output shapes for operations.
//!
//! Shapes are explicit descriptors attached to each operation when a backend
//! is built. They validate inbound payloads before a handler runs and feed the
//! backend's self-description (`Documents`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON type a field is expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Single field definition within a shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    /// Whether the field must be present (and non-null).
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Named object shape. A shape with no fields accepts any payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl Shape {
    /// Shape that places no constraints on the payload.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            name: "Empty".to_string(),
            fields: Vec::new(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a required field.
    #[must_use]
    pub fn required(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field(name, field_type, true, "")
    }

    /// Adds an optional field.
    #[must_use]
    pub fn optional(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field(name, field_type, false, "")
    }

    /// Adds a field with a description.
    #[must_use]
    pub fn field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        required: bool,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            field_type,
            required,
            description: description.into(),
        });
        self
    }

    /// Validates `value` against this shape.
    ///
    /// Unknown fields are tolerated. A `null` payload counts as an empty object.
    #[must_use]
    pub fn validate(&self, value: &Value) -> ValidationResult {
        if self.fields.is_empty() {
            return ValidationResult::Valid;
        }
        let empty = serde_json::Map::new();
        let object = match value {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return ValidationResult::Invalid {
                    errors: vec![format!(
                        "{} expects an object, got {}",
                        self.name,
                        type_name(other)
                    )],
                }
            }
        };

        let mut errors = Vec::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    errors.push(format!("{}.{} is required", self.name, field.name));
                }
                None | Some(Value::Null) => {}
                Some(v) if !field.field_type.accepts(v) => errors.push(format!(
                    "{}.{} expects {:?}, got {}",
                    self.name,
                    field.name,
                    field.field_type,
                    type_name(v)
                )),
                Some(_) => {}
            }
        }

        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
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

/// Result of validating a value against a shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid {
        /// Human-readable descriptions of each violation.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn login_shape() -> Shape {
        Shape::named("User")
            .required("username", FieldType::String)
            .required("password", FieldType::String)
            .optional("remember", FieldType::Boolean)
    }

    #[test]
    fn empty_shape_accepts_anything() {
        let shape = Shape::empty();
        for value in [json!(null), json!("{}"), json!(3), json!({"a": 1})] {
            assert!(shape.validate(&value).is_valid());
        }
    }

    #[test]
    fn valid_payload_passes() {
        let value = json!({"username": "ada", "password": "pw", "extra": [1]});
        assert!(login_shape().validate(&value).is_valid());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let result = login_shape().validate(&json!({"username": "ada"}));
        let ValidationResult::Invalid { errors } = result else {
            panic!("expected invalid");
        };
        assert_eq!(errors, vec!["User.password is required".to_string()]);
    }

    #[test]
    fn null_required_field_counts_as_missing() {
        let result = login_shape().validate(&json!({"username": "ada", "password": null}));
        assert!(!result.is_valid());
    }

    #[test]
    fn wrong_field_type_is_reported() {
        let value = json!({"username": "ada", "password": "pw", "remember": "yes"});
        let ValidationResult::Invalid { errors } = login_shape().validate(&value) else {
            panic!("expected invalid");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("remember"));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(!login_shape().validate(&json!([1, 2])).is_valid());
        assert!(!login_shape().validate(&json!(null)).is_valid());
    }

    #[test]
    fn integer_and_number_are_distinct() {
        let shape = Shape::named("Page").required("page", FieldType::Integer);
        assert!(shape.validate(&json!({"page": 2})).is_valid());
        assert!(!shape.validate(&json!({"page": 2.5})).is_valid());
    }
}
