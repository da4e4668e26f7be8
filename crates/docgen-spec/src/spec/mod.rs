pub mod definition;
pub mod document;
pub mod field;
pub mod template;

pub use definition::{DerivedDefinition, DocumentDefinition, TemplateDefinition};
pub use document::Document;
pub use field::{FieldDefinition, FieldEntry, FieldSchema, FieldType, GroupDefinition};
pub use template::{
    DerivedField, FlatField, LayoutEntry, Template, TemplateError, TemplateSummary,
    flatten_fields,
};
