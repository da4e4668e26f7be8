use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::expr::EvaluationError;
use crate::spec::field::FieldSchema;
use crate::spec::template::Template;
use crate::value::{FieldMap, FieldValue};

/// Outcome of evaluating raw input against a template.
///
/// `errors` has one entry per input field: `None` when it validated, the message
/// otherwise. Derived fields are present in `fields` only when `error_count` is zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub fields: FieldMap,
    pub errors: BTreeMap<String, Option<String>>,
    pub error_count: usize,
}

impl EvaluationReport {
    pub fn is_valid(&self) -> bool {
        self.error_count == 0
    }

    /// Rejected fields and their messages, ordered by field name.
    pub fn error_messages(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors
            .iter()
            .filter_map(|(field, error)| Some((field.as_str(), error.as_deref()?)))
    }
}

/// Validates every input field, then computes derived fields if nothing failed.
///
/// Field problems are collected in the report. A failing derived expression is a
/// template defect and aborts the call.
pub fn evaluate(template: &Template, input: &Value) -> Result<EvaluationReport, EvaluationError> {
    let mut fields = FieldMap::new();
    let mut errors = BTreeMap::new();
    let mut error_count = 0;

    for field in template.fields() {
        let raw = lookup_raw(input, field);
        match field.evaluate(raw, &fields) {
            Ok(value) => {
                fields.insert(field.name.clone(), value);
                errors.insert(field.name.clone(), None);
            }
            Err(error) => {
                debug!(field = %field.name, error = %error.message, "field rejected");
                fields.insert(field.name.clone(), FieldValue::verbatim(raw));
                errors.insert(field.name.clone(), Some(error.message));
                error_count += 1;
            }
        }
    }

    if let Some(input) = input.as_object() {
        let is_group = |key: &str| {
            template
                .fields()
                .iter()
                .any(|field| field.group.as_deref() == Some(key))
        };
        for key in input
            .keys()
            .filter(|key| template.field(key).is_none() && !is_group(key))
        {
            debug!(key = %key, "ignoring input without a matching field");
        }
    }

    if error_count == 0 {
        for derived in template.derived() {
            let value = derived
                .expression
                .derive(&fields)
                .map_err(|source| EvaluationError::Derived {
                    field: derived.name.clone(),
                    source: Box::new(source),
                })?;
            debug!(field = %derived.name, value = %value, "derived");
            fields.insert(derived.name.clone(), value);
        }
    }

    Ok(EvaluationReport {
        fields,
        errors,
        error_count,
    })
}

/// Finds the raw value for `field`: the flat `group.name` key first, then a nested
/// `{group: {name: ...}}` object.
fn lookup_raw<'a>(input: &'a Value, field: &FieldSchema) -> Option<&'a Value> {
    let input = input.as_object()?;
    if let Some(value) = input.get(&field.name) {
        return Some(value);
    }
    let group = field.group.as_deref()?;
    let member = field.name.strip_prefix(group)?.strip_prefix('.')?;
    input.get(group)?.as_object()?.get(member)
}
