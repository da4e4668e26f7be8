use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Evaluated fields keyed by their (flattened) name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A normalized field or derived value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    List(Vec<String>),
}

impl FieldValue {
    pub fn empty() -> Self {
        FieldValue::Text(String::new())
    }

    /// Truthiness used by `if`, document conditions and `dependsOn`.
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Text(text) => !text.is_empty(),
            FieldValue::Bool(flag) => *flag,
            FieldValue::List(items) => !items.is_empty(),
        }
    }

    /// Whether the validator treats the value as "no input".
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(text) => text.is_empty(),
            FieldValue::Bool(_) => false,
            FieldValue::List(items) => items.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Text(_) => ValueKind::Text,
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::List(_) => ValueKind::List,
        }
    }

    /// Converts user input into a value. Absent and `null` become empty text.
    pub fn from_raw(raw: Option<&Value>) -> Result<Self, ValueKind> {
        match raw {
            None | Some(Value::Null) => Ok(FieldValue::empty()),
            Some(Value::String(text)) => Ok(FieldValue::Text(text.clone())),
            Some(Value::Number(number)) => Ok(FieldValue::Text(number.to_string())),
            Some(Value::Bool(flag)) => Ok(FieldValue::Bool(*flag)),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(FieldValue::List)
                .ok_or(ValueKind::Other),
            Some(Value::Object(_)) => Err(ValueKind::Other),
        }
    }

    /// Like [`FieldValue::from_raw`] but never fails; used to echo rejected input back.
    pub fn verbatim(raw: Option<&Value>) -> Self {
        Self::from_raw(raw).unwrap_or_else(|_| match raw {
            Some(value) => FieldValue::Text(value.to_string()),
            None => FieldValue::empty(),
        })
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Bool(flag) => write!(f, "{flag}"),
            FieldValue::List(items) => f.write_str(&items.join(",")),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Text(text) => Value::String(text),
            FieldValue::Bool(flag) => Value::Bool(flag),
            FieldValue::List(items) => Value::Array(items.into_iter().map(Value::String).collect()),
        }
    }
}

/// Shape of a value, used in type-mismatch messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Bool,
    List,
    Other,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Bool => "boolean",
            ValueKind::List => "list",
            ValueKind::Other => "unsupported value",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
