//! Loading template packages.
//!
//! A package is a zip archive (or an unpacked directory) holding one definition
//! document plus one payload per declared document, stored under the document's
//! `name`.

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::spec::definition::TemplateDefinition;
use crate::spec::template::{Template, TemplateError};

/// Definition document names, in lookup order.
pub const DEFINITION_FILES: [&str; 3] = ["template.yml", "template.yaml", "template.json"];

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed template archive: {0}")]
    Archive(#[from] ZipError),
    #[error("template package has no template.yml, template.yaml or template.json")]
    MissingDefinition,
    #[error("invalid YAML definition: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON definition: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid template: {0}")]
    Template(#[from] TemplateError),
    #[error("document `{0}` is missing from the template package")]
    MissingDocument(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    pub fn from_file_name(name: &str) -> Self {
        if name.ends_with(".json") {
            DefinitionFormat::Json
        } else {
            DefinitionFormat::Yaml
        }
    }
}

pub fn load_definition(
    bytes: &[u8],
    format: DefinitionFormat,
) -> Result<TemplateDefinition, PackageError> {
    Ok(match format {
        DefinitionFormat::Yaml => serde_yaml::from_slice(bytes)?,
        DefinitionFormat::Json => serde_json::from_slice(bytes)?,
    })
}

/// Loads a template from a `.zip` file or a directory.
pub fn open(path: &Path) -> Result<Template, PackageError> {
    if path.is_dir() {
        return load_directory(path);
    }
    let bytes = fs::read(path).map_err(|source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_archive(&bytes)
}

/// Loads a template from zip archive bytes.
pub fn load_archive(bytes: &[u8]) -> Result<Template, PackageError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let definition_name = DEFINITION_FILES
        .iter()
        .find(|name| archive.index_for_name(name).is_some())
        .ok_or(PackageError::MissingDefinition)?;
    let definition = read_entry(&mut archive, definition_name)?;
    let definition = load_definition(&definition, DefinitionFormat::from_file_name(definition_name))?;

    let template = Template::from_definition(&definition)?;
    attach_payloads(&template, |name| read_entry(&mut archive, name))?;
    info!(template = %template.name(), documents = template.documents().len(), "template archive loaded");
    Ok(template)
}

/// Loads a template from an unpacked package directory.
pub fn load_directory(dir: &Path) -> Result<Template, PackageError> {
    let definition_path = DEFINITION_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or(PackageError::MissingDefinition)?;
    let format = DefinitionFormat::from_file_name(&definition_path.to_string_lossy());
    let definition = load_definition(&read_file(&definition_path)?, format)?;

    let template = Template::from_definition(&definition)?;
    attach_payloads(&template, |name| {
        let path = dir.join(name);
        if path.is_file() {
            read_file(&path)
        } else {
            Err(PackageError::MissingDocument(name.to_string()))
        }
    })?;
    info!(template = %template.name(), dir = %dir.display(), "template directory loaded");
    Ok(template)
}

/// Fetches and attaches the payload of every document that has none yet.
pub fn attach_payloads<F>(template: &Template, mut fetch: F) -> Result<(), PackageError>
where
    F: FnMut(&str) -> Result<Vec<u8>, PackageError>,
{
    for document in template.documents().iter().filter(|document| !document.is_loaded()) {
        let bytes = fetch(&document.name)?;
        debug!(document = %document.name, bytes = bytes.len(), "payload attached");
        document.attach_contents(bytes);
    }
    Ok(())
}

fn read_entry<R>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>, PackageError>
where
    R: Read + io::Seek,
{
    let mut entry = archive.by_name(name).map_err(|error| match error {
        ZipError::FileNotFound => PackageError::MissingDocument(name.to_string()),
        other => PackageError::Archive(other),
    })?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|source| PackageError::Io {
            path: PathBuf::from(name),
            source,
        })?;
    Ok(bytes)
}

fn read_file(path: &Path) -> Result<Vec<u8>, PackageError> {
    fs::read(path).map_err(|source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    })
}
