use std::io::{self, Cursor, Read, Write};

use regex::{Captures, Regex};
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::value::FieldMap;

/// Placeholder delimiters handed to a [`Renderer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub start: String,
    pub end: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            start: "[[".into(),
            end: "]]".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unresolved placeholder `{0}`")]
    UnresolvedPlaceholder(String),
    #[error("malformed document archive: {0}")]
    Archive(#[from] ZipError),
    #[error("document part `{part}` is not valid UTF-8 text")]
    Encoding { part: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid delimiters: {0}")]
    Delimiters(#[from] regex::Error),
}

/// Merges field values into a binary document.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        document: &[u8],
        fields: &FieldMap,
        delimiters: &Delimiters,
    ) -> Result<Vec<u8>, RenderError>;
}

/// Fills placeholders in a Word (`.docx`) document.
///
/// Placeholders are replaced in the main body, headers and footers. Every other
/// archive entry is copied untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxRenderer;

impl Renderer for DocxRenderer {
    fn render(
        &self,
        document: &[u8],
        fields: &FieldMap,
        delimiters: &Delimiters,
    ) -> Result<Vec<u8>, RenderError> {
        let placeholder = placeholder_regex(delimiters)?;
        let mut archive = ZipArchive::new(Cursor::new(document))?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let name = entry.name().to_string();
            if !is_text_part(&name) {
                writer.raw_copy_file(entry)?;
                continue;
            }

            let mut xml = String::new();
            entry
                .read_to_string(&mut xml)
                .map_err(|_| RenderError::Encoding { part: name.clone() })?;
            let options = SimpleFileOptions::default().compression_method(entry.compression());
            let merged = substitute(&placeholder, &xml, fields)?;
            writer.start_file(name, options)?;
            writer.write_all(merged.as_bytes())?;
        }

        Ok(writer.finish()?.into_inner())
    }
}

fn is_text_part(name: &str) -> bool {
    name == "word/document.xml"
        || (name.ends_with(".xml")
            && (name.starts_with("word/header") || name.starts_with("word/footer")))
}

fn placeholder_regex(delimiters: &Delimiters) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        "(?s){}(.*?){}",
        regex::escape(&delimiters.start),
        regex::escape(&delimiters.end)
    ))
}

/// Replaces placeholders in a document part.
///
/// Word may split a placeholder over several runs, so markup found between the
/// delimiters is kept after the substituted value.
fn substitute(placeholder: &Regex, xml: &str, fields: &FieldMap) -> Result<String, RenderError> {
    let markup = Regex::new("<[^>]*>")?;
    let mut unresolved = None;

    let merged = placeholder.replace_all(xml, |captures: &Captures<'_>| {
        let inner = &captures[1];
        let name = markup.replace_all(inner, "");
        let name = name.trim();
        match fields.get(name) {
            Some(value) => {
                let tags: String = markup
                    .find_iter(inner)
                    .map(|tag| tag.as_str())
                    .collect();
                format!("{}{}", escape_xml(&value.to_string()), tags)
            }
            None => {
                unresolved.get_or_insert_with(|| name.to_string());
                captures[0].to_string()
            }
        }
    });

    match unresolved {
        Some(name) => Err(RenderError::UnresolvedPlaceholder(name)),
        None => Ok(merged.into_owned()),
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;

    fn fields() -> FieldMap {
        FieldMap::from([
            ("name".to_string(), FieldValue::from("Ada & Co")),
            ("signed".to_string(), FieldValue::Bool(true)),
        ])
    }

    fn regex() -> Regex {
        placeholder_regex(&Delimiters::default()).unwrap()
    }

    #[test]
    fn substitutes_and_escapes() {
        let xml = "<w:t>Dear [[name]], signed: [[ signed ]]</w:t>";
        let merged = substitute(&regex(), xml, &fields()).unwrap();
        assert_eq!(merged, "<w:t>Dear Ada &amp; Co, signed: true</w:t>");
    }

    #[test]
    fn keeps_markup_of_split_placeholders() {
        let xml = "<w:t>[[na</w:t></w:r><w:r><w:t>me]]</w:t>";
        let merged = substitute(&regex(), xml, &fields()).unwrap();
        assert_eq!(merged, "<w:t>Ada &amp; Co</w:t></w:r><w:r><w:t></w:t>");
    }

    #[test]
    fn unresolved_placeholder_fails() {
        let err = substitute(&regex(), "<w:t>[[missing]]</w:t>", &fields()).unwrap_err();
        assert!(matches!(err, RenderError::UnresolvedPlaceholder(name) if name == "missing"));
    }

    #[test]
    fn only_word_text_parts_are_rewritten() {
        assert!(is_text_part("word/document.xml"));
        assert!(is_text_part("word/header1.xml"));
        assert!(is_text_part("word/footer2.xml"));
        assert!(!is_text_part("word/styles.xml"));
        assert!(!is_text_part("word/media/header.png"));
    }

    #[test]
    fn non_archive_input_is_rejected() {
        let err = DocxRenderer
            .render(b"not a zip", &fields(), &Delimiters::default())
            .unwrap_err();
        assert!(matches!(err, RenderError::Archive(_)));
    }
}
