use serde_json::{Map, Value, json};

use crate::spec::definition::TemplateDefinition;
use crate::spec::field::{FieldSchema, FieldType};
use crate::spec::template::Template;
use crate::value::FieldValue;

/// JSON Schema describing the raw input object accepted by `evaluate`.
///
/// Only unconditionally required fields without a usable default end up in
/// `required`; everything else may be omitted.
pub fn input_schema(template: &Template) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in template.fields() {
        properties.insert(field.name.clone(), field_schema(field));
        if field.required && field.depends_on.is_none() && field.default.is_empty() {
            required.push(Value::String(field.name.clone()));
        }
    }

    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": template.name(),
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn field_schema(field: &FieldSchema) -> Value {
    let mut schema = match field.kind {
        FieldType::String | FieldType::LongText => json!({ "type": "string" }),
        FieldType::Enum => json!({ "type": "string", "enum": field.options }),
        FieldType::Boolean => json!({ "type": ["boolean", "string"] }),
    };
    if let Some(map) = schema.as_object_mut() {
        map.insert("title".into(), Value::String(field.label.clone()));
        if let Some(description) = &field.description {
            map.insert("description".into(), Value::String(description.clone()));
        }
        if !field.default.is_empty() {
            map.insert("default".into(), field.default.clone().into());
        }
    }
    schema
}

/// Sample raw input: defaults where present, a marker value otherwise.
pub fn example_input(template: &Template) -> Value {
    let mut map = Map::new();
    for field in template.fields() {
        let value = if field.default.is_empty() {
            match field.kind {
                FieldType::Boolean => FieldValue::Bool(false),
                _ => FieldValue::Text(format!("example-{}", field.name)),
            }
        } else {
            field.default.clone()
        };
        map.insert(field.name.clone(), value.into());
    }
    Value::Object(map)
}

/// JSON Schema of the template definition format itself.
pub fn definition_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(TemplateDefinition)).unwrap_or(Value::Null)
}
