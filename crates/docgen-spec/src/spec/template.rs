use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::expr::{Expr, ExprError};
use crate::spec::definition::TemplateDefinition;
use crate::spec::document::Document;
use crate::spec::field::{FieldDefinition, FieldEntry, FieldSchema};
use crate::value::FieldValue;

/// Schema violations found while building a [`Template`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("enum field `{0}` needs a non-empty `options` list")]
    EnumWithoutOptions(String),
    #[error("invalid default for `{field}`: {message}")]
    InvalidDefault { field: String, message: String },
    #[error("field `{0}` is declared more than once")]
    DuplicateField(String),
    #[error("field `{field}` depends on unknown field `{depends_on}`")]
    UnknownDependency { field: String, depends_on: String },
    #[error("field `{field}` depends on `{depends_on}`, which is not declared before it")]
    ForwardDependency { field: String, depends_on: String },
    #[error("{context}: {source}")]
    InvalidExpression {
        context: String,
        #[source]
        source: ExprError,
    },
    #[error("{context} references `{name}`, which is not an input field or an earlier derived field")]
    UndefinedReference { context: String, name: String },
    #[error("document `{document}` takes its file name from unknown field `{field}`")]
    UnknownOutFile { document: String, field: String },
    #[error("document `{0}` is declared more than once")]
    DuplicateDocument(String),
}

/// Display tree over the flat field names; groups are preserved for forms.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutEntry {
    Field {
        name: String,
    },
    Group {
        name: String,
        label: String,
        fields: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedField {
    pub name: String,
    pub expression: Expr,
}

/// A field definition paired with its flattened name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatField<'a> {
    pub group: Option<&'a str>,
    pub definition: &'a FieldDefinition,
}

impl FlatField<'_> {
    /// `group.field` for group members, the plain name otherwise.
    pub fn name(&self) -> String {
        match self.group {
            Some(group) => format!("{group}.{}", self.definition.name),
            None => self.definition.name.clone(),
        }
    }
}

/// Expands group entries into their members, keeping declaration order.
pub fn flatten_fields(entries: &[FieldEntry]) -> Vec<FlatField<'_>> {
    entries
        .iter()
        .flat_map(|entry| match entry {
            FieldEntry::Field(definition) => vec![FlatField {
                group: None,
                definition,
            }],
            FieldEntry::Group(group) => group
                .fields
                .iter()
                .map(|definition| FlatField {
                    group: Some(group.group.as_str()),
                    definition,
                })
                .collect(),
        })
        .collect()
}

/// Public shape of a loaded template, enough to render an input form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSummary {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    pub layout: Vec<LayoutEntry>,
}

/// A loaded template: ordered input fields, derived fields and documents.
#[derive(Debug)]
pub struct Template {
    name: String,
    layout: Vec<LayoutEntry>,
    fields: Vec<FieldSchema>,
    derived: Vec<DerivedField>,
    documents: Vec<Document>,
}

impl Template {
    pub fn from_definition(definition: &TemplateDefinition) -> Result<Self, TemplateError> {
        let flat = flatten_fields(&definition.fields);

        let mut fields: Vec<FieldSchema> = Vec::with_capacity(flat.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        for entry in &flat {
            let name = entry.name();
            if positions.contains_key(&name) {
                return Err(TemplateError::DuplicateField(name));
            }
            positions.insert(name.clone(), fields.len());
            fields.push(FieldSchema::from_definition(entry.definition, name, entry.group)?);
        }

        for (index, field) in fields.iter_mut().enumerate() {
            if let Some(depends_on) = field.depends_on.take() {
                field.depends_on = Some(resolve_dependency(
                    &field.name,
                    field.group.as_deref(),
                    &depends_on,
                    index,
                    &positions,
                )?);
            }
        }

        let mut known: BTreeSet<String> = positions.into_keys().collect();
        let mut derived = Vec::with_capacity(definition.derived.len());
        for entry in &definition.derived {
            let context = format!("derived field `{}`", entry.name);
            let expression = parse_expression(&context, &entry.expression())?;
            check_references(&context, &expression, &known)?;
            if !known.insert(entry.name.clone()) {
                return Err(TemplateError::DuplicateField(entry.name.clone()));
            }
            derived.push(DerivedField {
                name: entry.name.clone(),
                expression,
            });
        }

        let mut document_names = BTreeSet::new();
        let mut documents = Vec::with_capacity(definition.documents.len());
        for entry in &definition.documents {
            if !document_names.insert(entry.name.as_str()) {
                return Err(TemplateError::DuplicateDocument(entry.name.clone()));
            }
            if !known.contains(&entry.out_file) {
                return Err(TemplateError::UnknownOutFile {
                    document: entry.name.clone(),
                    field: entry.out_file.clone(),
                });
            }
            let context = format!("conditions of document `{}`", entry.name);
            let conditions = match &entry.conditions {
                Some(conditions) => parse_expression(&context, conditions)?,
                None => Expr::Literal(FieldValue::Bool(true)),
            };
            check_references(&context, &conditions, &known)?;
            documents.push(Document::new(
                entry.name.clone(),
                entry.out_file.clone(),
                conditions,
            ));
        }

        debug!(
            template = %definition.name,
            fields = fields.len(),
            derived = derived.len(),
            documents = documents.len(),
            "template model built"
        );

        Ok(Self {
            name: definition.name.clone(),
            layout: build_layout(&definition.fields),
            fields,
            derived,
            documents,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input fields in declaration order, groups flattened.
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn derived(&self) -> &[DerivedField] {
        &self.derived
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn document(&self, name: &str) -> Option<&Document> {
        self.documents.iter().find(|document| document.name == name)
    }

    pub fn layout(&self) -> &[LayoutEntry] {
        &self.layout
    }

    /// Whether every document payload has been attached.
    pub fn is_ready(&self) -> bool {
        self.documents.iter().all(Document::is_loaded)
    }

    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            name: self.name.clone(),
            fields: self.fields.clone(),
            layout: self.layout.clone(),
        }
    }
}

fn resolve_dependency(
    field: &str,
    group: Option<&str>,
    depends_on: &str,
    index: usize,
    positions: &HashMap<String, usize>,
) -> Result<String, TemplateError> {
    let sibling = group.map(|group| format!("{group}.{depends_on}"));
    let candidates = sibling.into_iter().chain(std::iter::once(depends_on.to_string()));

    let mut forward = None;
    for candidate in candidates {
        match positions.get(&candidate) {
            Some(position) if *position < index => return Ok(candidate),
            Some(_) => forward = forward.or(Some(candidate)),
            None => {}
        }
    }

    Err(match forward {
        Some(depends_on) => TemplateError::ForwardDependency {
            field: field.to_string(),
            depends_on,
        },
        None => TemplateError::UnknownDependency {
            field: field.to_string(),
            depends_on: depends_on.to_string(),
        },
    })
}

fn parse_expression(context: &str, value: &Value) -> Result<Expr, TemplateError> {
    Expr::parse(value).map_err(|source| TemplateError::InvalidExpression {
        context: context.to_string(),
        source,
    })
}

fn check_references(
    context: &str,
    expression: &Expr,
    known: &BTreeSet<String>,
) -> Result<(), TemplateError> {
    match expression
        .field_references()
        .into_iter()
        .find(|name| !known.contains(*name))
    {
        Some(name) => Err(TemplateError::UndefinedReference {
            context: context.to_string(),
            name: name.to_string(),
        }),
        None => Ok(()),
    }
}

fn build_layout(entries: &[FieldEntry]) -> Vec<LayoutEntry> {
    entries
        .iter()
        .map(|entry| match entry {
            FieldEntry::Field(field) => LayoutEntry::Field {
                name: field.name.clone(),
            },
            FieldEntry::Group(group) => LayoutEntry::Group {
                name: group.group.clone(),
                label: group.label.clone().unwrap_or_else(|| group.group.clone()),
                fields: group
                    .fields
                    .iter()
                    .map(|field| format!("{}.{}", group.group, field.name))
                    .collect(),
            },
        })
        .collect()
}
