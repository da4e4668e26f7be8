#![allow(missing_docs)]

pub mod evaluate;
pub mod expr;
pub mod generate;
pub mod merge;
pub mod package;
pub mod render;
pub mod schema;
pub mod spec;
pub mod validate;
pub mod value;

pub use evaluate::{EvaluationReport, evaluate};
pub use expr::{EvaluationError, Expr, ExprError};
pub use generate::{
    DocumentFailure, GeneratedFile, GenerationError, GenerationPolicy, GenerationReport, generate,
};
pub use merge::{Delimiters, DocxRenderer, RenderError, Renderer};
pub use package::{DefinitionFormat, PackageError, load_archive, load_definition};
pub use render::{FormPayload, FormStatus, build_form_payload, render_json_ui, render_text};
pub use schema::{definition_schema, example_input, input_schema};
pub use spec::{
    FieldSchema, FieldType, LayoutEntry, Template, TemplateDefinition, TemplateError,
    TemplateSummary,
};
pub use validate::ValidationError;
pub use value::{FieldMap, FieldValue};
