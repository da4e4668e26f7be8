use serde_json::{Map, Value, json};

use crate::{
    evaluate::EvaluationReport,
    spec::{
        field::FieldType,
        template::{LayoutEntry, Template},
    },
    value::FieldValue,
};

/// Status labels returned by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormStatus {
    /// Nothing has been evaluated yet.
    NeedInput,
    /// At least one field was rejected.
    Invalid,
    /// Every field validated and derived values were computed.
    Complete,
}

impl FormStatus {
    /// Label used by the JSON and text renderers.
    pub fn as_str(&self) -> &'static str {
        match self {
            FormStatus::NeedInput => "need_input",
            FormStatus::Invalid => "invalid",
            FormStatus::Complete => "complete",
        }
    }
}

/// Progress counters exposed to renderers.
#[derive(Debug, Clone)]
pub struct FormProgress {
    pub valid: usize,
    pub total: usize,
}

/// Describes a single input field for render outputs.
#[derive(Debug, Clone)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub description: Option<String>,
    pub kind: FieldType,
    pub required: bool,
    pub default: FieldValue,
    pub options: Vec<String>,
    pub placeholder: Option<String>,
    pub depends_on: Option<String>,
    pub group: Option<String>,
    pub current_value: Option<FieldValue>,
    pub error: Option<String>,
}

/// Collected payload used by both text and JSON renderers.
#[derive(Debug, Clone)]
pub struct FormPayload {
    pub template_name: String,
    pub status: FormStatus,
    pub progress: FormProgress,
    pub layout: Vec<LayoutEntry>,
    pub fields: Vec<FormField>,
    pub derived: Vec<(String, Option<FieldValue>)>,
    pub documents: Vec<String>,
}

/// Build the form payload for a template, optionally filled from an evaluation.
pub fn build_form_payload(template: &Template, report: Option<&EvaluationReport>) -> FormPayload {
    let fields = template
        .fields()
        .iter()
        .map(|field| FormField {
            name: field.name.clone(),
            label: field.label.clone(),
            description: field.description.clone(),
            kind: field.kind,
            required: field.required,
            default: field.default.clone(),
            options: field.options.clone(),
            placeholder: field.placeholder.clone(),
            depends_on: field.depends_on.clone(),
            group: field.group.clone(),
            current_value: report.and_then(|report| report.fields.get(&field.name).cloned()),
            error: report
                .and_then(|report| report.errors.get(&field.name))
                .and_then(|error| error.clone()),
        })
        .collect::<Vec<_>>();

    let derived = template
        .derived()
        .iter()
        .map(|derived| {
            let value = report.and_then(|report| report.fields.get(&derived.name).cloned());
            (derived.name.clone(), value)
        })
        .collect();

    let status = match report {
        None => FormStatus::NeedInput,
        Some(report) if report.is_valid() => FormStatus::Complete,
        Some(_) => FormStatus::Invalid,
    };
    let valid = match report {
        Some(_) => fields.iter().filter(|field| field.error.is_none()).count(),
        None => 0,
    };

    FormPayload {
        template_name: template.name().to_string(),
        status,
        progress: FormProgress {
            valid,
            total: fields.len(),
        },
        layout: template.layout().to_vec(),
        fields,
        derived,
        documents: template
            .documents()
            .iter()
            .map(|document| document.name.clone())
            .collect(),
    }
}

/// Render the payload as a structured JSON-friendly value.
pub fn render_json_ui(payload: &FormPayload) -> Value {
    let fields = payload
        .fields
        .iter()
        .map(|field| {
            let mut map = Map::new();
            map.insert("name".into(), Value::String(field.name.clone()));
            map.insert("label".into(), Value::String(field.label.clone()));
            map.insert(
                "description".into(),
                field
                    .description
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            );
            map.insert("type".into(), Value::String(field.kind.as_str().to_string()));
            map.insert("required".into(), Value::Bool(field.required));
            map.insert("default".into(), field.default.clone().into());
            if !field.options.is_empty() {
                map.insert(
                    "options".into(),
                    Value::Array(
                        field
                            .options
                            .iter()
                            .map(|option| Value::String(option.clone()))
                            .collect(),
                    ),
                );
            }
            if let Some(placeholder) = &field.placeholder {
                map.insert("placeholder".into(), Value::String(placeholder.clone()));
            }
            if let Some(depends_on) = &field.depends_on {
                map.insert("depends_on".into(), Value::String(depends_on.clone()));
            }
            if let Some(group) = &field.group {
                map.insert("group".into(), Value::String(group.clone()));
            }
            if let Some(current_value) = &field.current_value {
                map.insert("current_value".into(), current_value.clone().into());
            }
            map.insert(
                "error".into(),
                field.error.clone().map(Value::String).unwrap_or(Value::Null),
            );
            Value::Object(map)
        })
        .collect::<Vec<_>>();

    let derived = payload
        .derived
        .iter()
        .map(|(name, value)| {
            json!({
                "name": name,
                "value": value.clone().map(Value::from),
            })
        })
        .collect::<Vec<_>>();

    json!({
        "template": payload.template_name,
        "status": payload.status.as_str(),
        "progress": {
            "valid": payload.progress.valid,
            "total": payload.progress.total,
        },
        "layout": payload.layout,
        "fields": fields,
        "derived": derived,
        "documents": payload.documents,
    })
}

/// Render the payload as human-friendly text.
pub fn render_text(payload: &FormPayload) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Template: {}", payload.template_name));
    lines.push(format!(
        "Status: {} ({}/{})",
        payload.status.as_str(),
        payload.progress.valid,
        payload.progress.total
    ));

    lines.push("Fields:".to_string());
    for entry in &payload.layout {
        match entry {
            LayoutEntry::Field { name } => {
                if let Some(field) = payload.field(name) {
                    lines.push(field_line(field, " - "));
                }
            }
            LayoutEntry::Group {
                label, fields, ..
            } => {
                lines.push(format!(" [{}]", label));
                for name in fields {
                    if let Some(field) = payload.field(name) {
                        lines.push(field_line(field, "   - "));
                    }
                }
            }
        }
    }

    if !payload.derived.is_empty() {
        lines.push("Derived:".to_string());
        for (name, value) in &payload.derived {
            match value {
                Some(value) => lines.push(format!(" - {} = {}", name, value)),
                None => lines.push(format!(" - {}", name)),
            }
        }
    }

    if !payload.documents.is_empty() {
        lines.push(format!("Documents: {}", payload.documents.join(", ")));
    }

    lines.join("\n")
}

impl FormPayload {
    fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

fn field_line(field: &FormField, prefix: &str) -> String {
    let mut entry = format!("{}{} ({}, {})", prefix, field.name, field.label, field.kind.as_str());
    if field.required {
        entry.push_str(" [required]");
    }
    if let Some(depends_on) = &field.depends_on {
        entry.push_str(&format!(" [if {}]", depends_on));
    }
    if !field.options.is_empty() {
        entry.push_str(&format!(" {{{}}}", field.options.join("|")));
    }
    if let Some(current_value) = &field.current_value {
        entry.push_str(&format!(" = {}", current_value));
    }
    if let Some(error) = &field.error {
        entry.push_str(&format!(" ! {}", error));
    }
    entry
}
