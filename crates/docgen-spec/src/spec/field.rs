use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::spec::template::TemplateError;
use crate::validate::coerce_boolean;
use crate::value::FieldValue;

/// Supported input field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    #[default]
    String,
    LongText,
    Enum,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::LongText => "longText",
            FieldType::Enum => "enum",
            FieldType::Boolean => "boolean",
        }
    }
}

fn default_required() -> bool {
    true
}

/// One input field as written in a template definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(
        default,
        rename = "dependsOn",
        alias = "depends_on",
        skip_serializing_if = "Option::is_none"
    )]
    pub depends_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

/// A named group of fields. Members are addressed as `group.field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GroupDefinition {
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub fields: Vec<FieldDefinition>,
}

/// Entry of the `fields` list: a plain field or a group of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldEntry {
    Group(GroupDefinition),
    Field(FieldDefinition),
}

/// Parsed input field with its defaults resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub default: FieldValue,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl FieldSchema {
    /// Builds the schema for `definition` under its flattened `name`.
    ///
    /// `depends_on` is copied as written; the template resolves it against the
    /// full field list.
    pub fn from_definition(
        definition: &FieldDefinition,
        name: String,
        group: Option<&str>,
    ) -> Result<Self, TemplateError> {
        let options = match definition.kind {
            FieldType::Enum => match &definition.options {
                Some(options) if !options.is_empty() => options.clone(),
                _ => return Err(TemplateError::EnumWithoutOptions(name)),
            },
            _ => Vec::new(),
        };
        let default = resolve_default(definition, &name, &options)?;

        Ok(Self {
            label: definition.label.clone().unwrap_or_else(|| name.clone()),
            description: definition.description.clone(),
            kind: definition.kind,
            options,
            default,
            required: definition.required,
            depends_on: definition.depends_on.clone(),
            placeholder: definition.placeholder.clone(),
            group: group.map(str::to_string),
            name,
        })
    }
}

fn resolve_default(
    definition: &FieldDefinition,
    name: &str,
    options: &[String],
) -> Result<FieldValue, TemplateError> {
    let invalid = |message: String| TemplateError::InvalidDefault {
        field: name.to_string(),
        message,
    };

    let Some(raw) = definition.default.as_ref().filter(|raw| !raw.is_null()) else {
        return Ok(match definition.kind {
            FieldType::Enum => FieldValue::Text(options[0].clone()),
            FieldType::String | FieldType::LongText => FieldValue::empty(),
            FieldType::Boolean => FieldValue::Bool(false),
        });
    };

    match (definition.kind, raw) {
        (FieldType::Boolean, Value::Bool(flag)) => Ok(FieldValue::Bool(*flag)),
        (FieldType::Boolean, Value::String(text)) => coerce_boolean(text)
            .map(FieldValue::Bool)
            .ok_or_else(|| invalid(format!("`{text}` is not true/false/yes/no"))),
        (FieldType::Enum, Value::String(text)) if options.contains(text) => {
            Ok(FieldValue::Text(text.clone()))
        }
        (FieldType::Enum, other) => Err(invalid(format!("{other} is not one of the options"))),
        (FieldType::String | FieldType::LongText, Value::String(text)) => {
            Ok(FieldValue::Text(text.clone()))
        }
        (FieldType::String | FieldType::LongText, Value::Number(number)) => {
            Ok(FieldValue::Text(number.to_string()))
        }
        (kind, other) => Err(invalid(format!(
            "{other} is not a valid {} default",
            kind.as_str()
        ))),
    }
}
