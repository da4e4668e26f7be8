use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::spec::field::{FieldSchema, FieldType};
use crate::value::{FieldMap, FieldValue};

const FALSE_TOKENS: [&str; 6] = ["false", "no", "f", "n", "", "1"];
const TRUE_TOKENS: [&str; 5] = ["true", "yes", "t", "y", "0"];

/// A user-correctable problem with one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &FieldSchema, message: String) -> Self {
        Self {
            field: field.name.clone(),
            message,
        }
    }
}

/// Maps a boolean token to its value.
///
/// `"0"` reads as true and `"1"` as false. Existing templates and data files rely on
/// this mapping.
pub fn coerce_boolean(text: &str) -> Option<bool> {
    let token = text.to_lowercase();
    if FALSE_TOKENS.contains(&token.as_str()) {
        Some(false)
    } else if TRUE_TOKENS.contains(&token.as_str()) {
        Some(true)
    } else {
        None
    }
}

impl FieldSchema {
    /// Normalizes `raw` for this field. `prior` holds the fields declared before it.
    pub fn evaluate(
        &self,
        raw: Option<&Value>,
        prior: &FieldMap,
    ) -> Result<FieldValue, ValidationError> {
        let mut value = FieldValue::from_raw(raw).map_err(|_| {
            ValidationError::new(
                self,
                format!("Value of {} must be text, a boolean or a list", self.name),
            )
        })?;

        if value.is_empty() && !self.default.is_empty() {
            value = self.default.clone();
        }

        if value.is_empty() && self.required {
            let waived = self
                .depends_on
                .as_ref()
                .is_some_and(|dependency| !prior.get(dependency).is_some_and(FieldValue::is_truthy));
            if waived {
                return Ok(value);
            }
            return Err(ValidationError::new(
                self,
                format!("Field {} is required", self.name),
            ));
        }

        match self.kind {
            FieldType::Enum => match &value {
                FieldValue::Text(text) if self.options.contains(text) => Ok(value),
                _ => Err(ValidationError::new(
                    self,
                    format!(
                        "Value of {} must be one of: {}",
                        self.name,
                        self.options
                            .iter()
                            .map(|option| Value::String(option.clone()).to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )),
            },
            FieldType::Boolean => match &value {
                FieldValue::Bool(flag) => Ok(FieldValue::Bool(*flag)),
                FieldValue::Text(text) => coerce_boolean(text).map(FieldValue::Bool).ok_or_else(
                    || {
                        ValidationError::new(
                            self,
                            format!("Value of {} must be true/false/yes/no", self.name),
                        )
                    },
                ),
                FieldValue::List(_) => Err(ValidationError::new(
                    self,
                    format!("Value of {} must be true/false/yes/no", self.name),
                )),
            },
            FieldType::String | FieldType::LongText => match value {
                FieldValue::Text(_) => Ok(value),
                _ => Err(ValidationError::new(
                    self,
                    format!("Value of {} must be text", self.name),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::field::FieldDefinition;
    use serde_json::json;

    fn field(definition: Value) -> FieldSchema {
        let definition: FieldDefinition = serde_json::from_value(definition).expect("definition");
        let name = definition.name.clone();
        FieldSchema::from_definition(&definition, name, None).expect("schema")
    }

    fn check(schema: &FieldSchema, raw: Value) -> Result<FieldValue, ValidationError> {
        schema.evaluate(Some(&raw), &FieldMap::new())
    }

    #[test]
    fn required_text_without_default_fails() {
        let schema = field(json!({ "name": "client" }));
        let err = schema.evaluate(None, &FieldMap::new()).unwrap_err();
        assert_eq!(err.field, "client");
        assert_eq!(err.message, "Field client is required");
        assert!(check(&schema, json!("")).is_err());
    }

    #[test]
    fn optional_text_passes_empty() {
        let schema = field(json!({ "name": "note", "required": false }));
        assert_eq!(check(&schema, json!("")).unwrap(), FieldValue::empty());
    }

    #[test]
    fn default_fills_empty_input() {
        let schema = field(json!({ "name": "city", "default": "Berlin" }));
        assert_eq!(check(&schema, json!("")).unwrap(), FieldValue::from("Berlin"));
        assert_eq!(check(&schema, json!("Paris")).unwrap(), FieldValue::from("Paris"));
    }

    #[test]
    fn dependency_waives_requiredness_when_falsy() {
        let schema = field(json!({ "name": "spouse", "dependsOn": "married" }));
        let mut prior = FieldMap::new();
        prior.insert("married".into(), FieldValue::Bool(false));
        assert_eq!(schema.evaluate(None, &prior).unwrap(), FieldValue::empty());

        prior.insert("married".into(), FieldValue::Bool(true));
        assert!(schema.evaluate(None, &prior).is_err());
    }

    #[test]
    fn missing_dependency_counts_as_falsy() {
        let schema = field(json!({ "name": "spouse", "dependsOn": "married" }));
        assert!(schema.evaluate(None, &FieldMap::new()).is_ok());
    }

    #[test]
    fn boolean_tokens_normalize() {
        let schema = field(json!({ "name": "flag", "type": "boolean" }));
        for raw in [json!("yes"), json!("Y"), json!("t"), json!(true), json!("0"), json!("TRUE")] {
            assert_eq!(check(&schema, raw).unwrap(), FieldValue::Bool(true));
        }
        for raw in [json!("no"), json!("N"), json!("f"), json!(false), json!(""), json!("1")] {
            assert_eq!(check(&schema, raw).unwrap(), FieldValue::Bool(false));
        }
        let err = check(&schema, json!("maybe")).unwrap_err();
        assert_eq!(err.message, "Value of flag must be true/false/yes/no");
    }

    #[test]
    fn enum_membership_is_case_sensitive() {
        let schema = field(json!({
            "name": "kind", "type": "enum", "options": ["Lease", "Sale"], "default": "Sale"
        }));
        assert_eq!(check(&schema, json!("Lease")).unwrap(), FieldValue::from("Lease"));
        let err = check(&schema, json!("lease")).unwrap_err();
        assert_eq!(err.message, r#"Value of kind must be one of: "Lease", "Sale""#);
        assert_eq!(check(&schema, json!("")).unwrap(), FieldValue::from("Sale"));
    }

    #[test]
    fn enum_options_are_quoted_as_json() {
        let schema = field(json!({
            "name": "mark", "type": "enum", "options": ["Café \"A\"", "\u{1}"]
        }));
        let err = check(&schema, json!("x")).unwrap_err();
        assert_eq!(
            err.message,
            r#"Value of mark must be one of: "Café \"A\"", "\u0001""#
        );
    }

    #[test]
    fn text_fields_reject_booleans() {
        let schema = field(json!({ "name": "client" }));
        assert!(check(&schema, json!(true)).is_err());
        assert!(check(&schema, json!({ "nested": 1 })).is_err());
    }
}
