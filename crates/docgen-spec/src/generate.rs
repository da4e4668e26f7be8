use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::evaluate::EvaluationReport;
use crate::expr::EvaluationError;
use crate::merge::{Delimiters, RenderError, Renderer};
use crate::spec::document::Document;
use crate::spec::template::Template;
use crate::value::{FieldMap, FieldValue};

/// Extension appended to every generated file name.
pub const OUTPUT_EXTENSION: &str = "docx";

/// Failure generating one document. Sibling documents are unaffected.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("document payload `{0}` was not loaded")]
    MissingPayload(String),
    #[error("output file name field `{field}` {reason}")]
    OutputName { field: String, reason: &'static str },
    #[error("render failed: {0}")]
    Render(#[from] RenderError),
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub filename: String,
    pub error: String,
}

/// Per-document outcome of a generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub generated_files: Vec<GeneratedFile>,
    pub errors: Vec<DocumentFailure>,
    pub error_count: usize,
}

/// Whether documents may be generated from an evaluation that reported errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPolicy {
    #[default]
    Strict,
    Relaxed,
}

impl GenerationPolicy {
    pub fn permits(&self, report: &EvaluationReport) -> bool {
        match self {
            GenerationPolicy::Strict => report.is_valid(),
            GenerationPolicy::Relaxed => true,
        }
    }
}

/// Renders every document whose conditions hold into `out_dir`.
///
/// Conditions are all evaluated before anything is written. A condition reading a
/// field with no value (a derived field skipped after input errors) counts as false;
/// any other failing condition aborts the run. Render and write failures are
/// recorded per document. Files written before a failure stay on disk.
pub fn generate(
    template: &Template,
    fields: &FieldMap,
    out_dir: &Path,
    renderer: &dyn Renderer,
) -> Result<GenerationReport, EvaluationError> {
    let mut emitted = Vec::new();
    for document in template.documents() {
        let emit = match document.conditions.derive(fields) {
            Ok(value) => value.is_truthy(),
            Err(EvaluationError::UndefinedField(field)) => {
                debug!(document = %document.name, field = %field, "condition reads a field without a value");
                false
            }
            Err(source) => {
                return Err(EvaluationError::Condition {
                    document: document.name.clone(),
                    source: Box::new(source),
                });
            }
        };
        if emit {
            emitted.push(document);
        } else {
            debug!(document = %document.name, "conditions not met, skipping");
        }
    }

    let delimiters = Delimiters::default();
    let mut report = GenerationReport::default();
    for document in emitted {
        let filename = match output_filename(document, fields) {
            Ok(filename) => filename,
            Err(error) => {
                record_failure(&mut report, document.name.clone(), error);
                continue;
            }
        };
        match render_document(document, fields, &out_dir.join(&filename), renderer, &delimiters)
        {
            Ok(path) => {
                debug!(document = %document.name, path = %path.display(), "document written");
                report.generated_files.push(GeneratedFile { path, filename });
            }
            Err(error) => record_failure(&mut report, filename, error),
        }
    }

    info!(
        template = %template.name(),
        generated = report.generated_files.len(),
        failed = report.error_count,
        "document generation finished"
    );
    Ok(report)
}

fn record_failure(report: &mut GenerationReport, filename: String, error: GenerationError) {
    warn!(filename = %filename, error = %error, "document generation failed");
    report.errors.push(DocumentFailure {
        filename,
        error: error.to_string(),
    });
    report.error_count += 1;
}

/// `basename(fields[out_file]).docx`.
pub fn output_filename(document: &Document, fields: &FieldMap) -> Result<String, GenerationError> {
    let invalid = |reason| GenerationError::OutputName {
        field: document.out_file.clone(),
        reason,
    };
    let base = match fields.get(&document.out_file) {
        Some(FieldValue::Text(text)) => text,
        Some(_) => return Err(invalid("must be text")),
        None => return Err(invalid("has no value")),
    };
    let base = Path::new(base)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| invalid("is empty"))?;
    Ok(format!("{base}.{OUTPUT_EXTENSION}"))
}

fn render_document(
    document: &Document,
    fields: &FieldMap,
    path: &Path,
    renderer: &dyn Renderer,
    delimiters: &Delimiters,
) -> Result<PathBuf, GenerationError> {
    let contents = document
        .contents()
        .ok_or_else(|| GenerationError::MissingPayload(document.name.clone()))?;
    let rendered = renderer.render(contents, fields, delimiters)?;
    fs::write(path, rendered).map_err(|source| GenerationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}
