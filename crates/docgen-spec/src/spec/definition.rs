use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::spec::field::FieldEntry;

/// Declarative template definition as stored in a template package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldEntry>,
    #[serde(default)]
    pub derived: Vec<DerivedDefinition>,
    #[serde(default)]
    pub documents: Vec<DocumentDefinition>,
}

/// A derived field: its name plus an expression.
///
/// The expression is either given under `expression` (or `value`) or written
/// inline next to `name` (`{name, op, ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DerivedDefinition {
    pub name: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl DerivedDefinition {
    pub fn expression(&self) -> Value {
        if self.body.contains_key("op") {
            return Value::Object(self.body.clone());
        }
        match self.body.get("expression").or_else(|| self.body.get("value")) {
            Some(expression) => expression.clone(),
            None => Value::Object(self.body.clone()),
        }
    }
}

/// An output document of the template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentDefinition {
    /// Entry name of the document payload inside the package.
    pub name: String,
    /// Field whose value names the generated file.
    #[serde(rename = "outFile", alias = "out_file")]
    pub out_file: String,
    /// Emission condition; the document is always emitted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Value>,
}
