use std::fs;
use std::io::{Cursor, Read, Write};

use serde_json::json;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use docgen_spec::{
    Delimiters, DocxRenderer, EvaluationError, FieldMap, FieldValue, PackageError, RenderError,
    Renderer, Template, TemplateDefinition, evaluate, generate, load_archive,
    package::attach_payloads,
};

const LEASE_YML: &str = include_str!("fixtures/lease.yml");

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer.start_file(*name, options).expect("start entry");
        writer.write_all(bytes).expect("write entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

fn docx(body: &str) -> Vec<u8> {
    let document = format!(
        r#"<?xml version="1.0"?><w:document><w:body><w:p><w:r><w:t>{body}</w:t></w:r></w:p></w:body></w:document>"#
    );
    zip_bytes(&[
        ("[Content_Types].xml", b"<Types/>".as_slice()),
        ("word/document.xml", document.as_bytes()),
        ("word/styles.xml", b"<w:styles>[[untouched]]</w:styles>".as_slice()),
    ])
}

fn read_part(docx: &[u8], part: &str) -> String {
    let mut archive = ZipArchive::new(Cursor::new(docx)).expect("docx archive");
    let mut text = String::new();
    archive
        .by_name(part)
        .expect("part")
        .read_to_string(&mut text)
        .expect("utf-8 part");
    text
}

fn lease_package() -> Vec<u8> {
    let lease = docx("Lease for [[tenant]] ([[kind]])");
    let guarantee = docx("[[guarantor.name]] guarantees [[title]]");
    zip_bytes(&[
        ("template.yml", LEASE_YML.as_bytes()),
        ("lease.docx", &lease),
        ("guarantee.docx", &guarantee),
    ])
}

fn definition(value: serde_json::Value) -> TemplateDefinition {
    serde_json::from_value(value).expect("definition")
}

#[test]
fn generates_every_emitted_document() {
    let template = load_archive(&lease_package()).expect("package");
    assert!(template.is_ready());

    let input = json!({
        "tenant": "Ada Lovelace",
        "kind": "Sublease",
        "has_guarantor": "yes",
        "guarantor.name": "Charles Babbage",
    });
    let report = evaluate(&template, &input).expect("evaluation");
    let out = TempDir::new().expect("temp dir");

    let generation = generate(&template, &report.fields, out.path(), &DocxRenderer).expect("generate");

    assert_eq!(generation.error_count, 0);
    let names: Vec<_> = generation
        .generated_files
        .iter()
        .map(|file| file.filename.as_str())
        .collect();
    assert_eq!(names, vec!["Sublease_LOVELACE.docx", "guarantee-lovelace.docx"]);

    let lease = fs::read(out.path().join("Sublease_LOVELACE.docx")).expect("lease written");
    assert!(read_part(&lease, "word/document.xml").contains("Lease for Ada Lovelace (Sublease)"));
    assert_eq!(
        read_part(&lease, "word/styles.xml"),
        "<w:styles>[[untouched]]</w:styles>"
    );

    let guarantee = fs::read(&generation.generated_files[1].path).expect("guarantee written");
    assert!(
        read_part(&guarantee, "word/document.xml")
            .contains("Charles Babbage guarantees Sublease-LOVELACE")
    );
}

#[test]
fn false_conditions_skip_documents_without_error() {
    let template = load_archive(&lease_package()).expect("package");
    let report = evaluate(&template, &json!({ "tenant": "Ada Lovelace", "has_guarantor": "no" }))
        .expect("evaluation");
    let out = TempDir::new().expect("temp dir");

    let generation = generate(&template, &report.fields, out.path(), &DocxRenderer).expect("generate");

    assert_eq!(generation.generated_files.len(), 1);
    assert!(generation.errors.is_empty());
    assert!(!out.path().join("guarantee-lovelace.docx").exists());
}

struct RefusingRenderer;

impl Renderer for RefusingRenderer {
    fn render(
        &self,
        document: &[u8],
        _fields: &FieldMap,
        _delimiters: &Delimiters,
    ) -> Result<Vec<u8>, RenderError> {
        if document == b"second" {
            return Err(RenderError::UnresolvedPlaceholder("broken".into()));
        }
        Ok(document.to_vec())
    }
}

fn three_documents() -> Template {
    Template::from_definition(&definition(json!({
        "name": "three",
        "fields": [{ "name": "client" }],
        "derived": [
            { "name": "a", "op": "concat", "args": ["first-", { "op": "field", "name": "client" }] },
            { "name": "b", "op": "concat", "args": ["second-", { "op": "field", "name": "client" }] },
            { "name": "c", "op": "concat", "args": ["third-", { "op": "field", "name": "client" }] }
        ],
        "documents": [
            { "name": "first", "outFile": "a" },
            { "name": "second", "outFile": "b" },
            { "name": "third", "outFile": "c" }
        ]
    })))
    .expect("template")
}

#[test]
fn one_failing_document_does_not_block_the_others() {
    let template = three_documents();
    attach_payloads(&template, |name| Ok(name.as_bytes().to_vec())).expect("payloads");
    let report = evaluate(&template, &json!({ "client": "acme" })).expect("evaluation");
    let out = TempDir::new().expect("temp dir");

    let generation =
        generate(&template, &report.fields, out.path(), &RefusingRenderer).expect("generate");

    let names: Vec<_> = generation
        .generated_files
        .iter()
        .map(|file| file.filename.as_str())
        .collect();
    assert_eq!(names, vec!["first-acme.docx", "third-acme.docx"]);
    assert_eq!(generation.error_count, 1);
    assert_eq!(generation.errors[0].filename, "second-acme.docx");
    assert!(generation.errors[0].error.contains("broken"));
    assert_eq!(
        fs::read(out.path().join("third-acme.docx")).expect("third written"),
        b"third"
    );
}

#[test]
fn missing_payload_is_a_document_error() {
    let template = three_documents();
    let report = evaluate(&template, &json!({ "client": "acme" })).expect("evaluation");
    let out = TempDir::new().expect("temp dir");

    let generation = generate(&template, &report.fields, out.path(), &DocxRenderer).expect("generate");

    assert_eq!(generation.error_count, 3);
    assert!(generation.generated_files.is_empty());
}

#[test]
fn failing_condition_aborts_before_writing() {
    let template = Template::from_definition(&definition(json!({
        "name": "bad-condition",
        "fields": [
            { "name": "client" },
            { "name": "flag", "type": "boolean" }
        ],
        "documents": [
            { "name": "first", "outFile": "client" },
            { "name": "second", "outFile": "client",
              "conditions": { "op": "upper", "arg": { "op": "field", "name": "flag" } } }
        ]
    })))
    .expect("template");
    attach_payloads(&template, |name| Ok(name.as_bytes().to_vec())).expect("payloads");
    let fields = FieldMap::from([
        ("client".to_string(), FieldValue::from("acme")),
        ("flag".to_string(), FieldValue::Bool(true)),
    ]);
    let out = TempDir::new().expect("temp dir");

    let err = generate(&template, &fields, out.path(), &RefusingRenderer).unwrap_err();

    assert!(matches!(err, EvaluationError::Condition { document, .. } if document == "second"));
    assert_eq!(fs::read_dir(out.path()).expect("out dir").count(), 0);
}

#[test]
fn package_without_document_payload_fails_to_load() {
    let package = zip_bytes(&[("template.yml", LEASE_YML.as_bytes())]);
    let err = load_archive(&package).unwrap_err();
    assert!(matches!(err, PackageError::MissingDocument(name) if name == "lease.docx"));
}

#[test]
fn package_without_definition_fails_to_load() {
    let package = zip_bytes(&[("lease.docx", b"x".as_slice())]);
    assert!(matches!(
        load_archive(&package),
        Err(PackageError::MissingDefinition)
    ));
}

#[test]
fn package_with_schema_violation_fails_to_load() {
    let package = zip_bytes(&[(
        "template.json",
        br#"{ "name": "t", "fields": [{ "name": "kind", "type": "enum" }] }"#.as_slice(),
    )]);
    assert!(matches!(
        load_archive(&package),
        Err(PackageError::Template(_))
    ));
}

#[test]
fn unpacked_directory_and_zip_file_load_alike() {
    let dir = TempDir::new().expect("temp dir");
    let unpacked = dir.path().join("lease");
    fs::create_dir(&unpacked).expect("package dir");
    fs::write(unpacked.join("template.yml"), LEASE_YML).expect("definition");
    fs::write(unpacked.join("lease.docx"), docx("[[tenant]]")).expect("lease");
    fs::write(unpacked.join("guarantee.docx"), docx("[[title]]")).expect("guarantee");
    let archive = dir.path().join("lease.zip");
    fs::write(&archive, lease_package()).expect("archive");

    let from_dir = docgen_spec::package::open(&unpacked).expect("directory package");
    let from_zip = docgen_spec::package::open(&archive).expect("zip package");

    assert_eq!(from_dir.summary(), from_zip.summary());
    assert!(from_dir.is_ready());
    assert_eq!(
        from_dir.document("lease.docx").and_then(|doc| doc.contents()),
        Some(fs::read(unpacked.join("lease.docx")).expect("payload").as_slice())
    );

    fs::remove_file(unpacked.join("guarantee.docx")).expect("remove payload");
    assert!(matches!(
        docgen_spec::package::open(&unpacked),
        Err(PackageError::MissingDocument(name)) if name == "guarantee.docx"
    ));
}

#[test]
fn conditions_on_skipped_derived_fields_count_as_false() {
    let template = Template::from_definition(&definition(json!({
        "name": "partial",
        "fields": [{ "name": "client" }, { "name": "city" }],
        "derived": [
            { "name": "is_acme", "op": "eq", "left": { "op": "field", "name": "client" }, "right": "acme" }
        ],
        "documents": [
            { "name": "letter", "outFile": "client" },
            { "name": "offer", "outFile": "client",
              "conditions": { "op": "field", "name": "is_acme" } }
        ]
    })))
    .expect("template");
    attach_payloads(&template, |name| Ok(name.as_bytes().to_vec())).expect("payloads");
    let report = evaluate(&template, &json!({ "client": "acme" })).expect("evaluation");
    assert_eq!(report.error_count, 1);
    let out = TempDir::new().expect("temp dir");

    let generation =
        generate(&template, &report.fields, out.path(), &RefusingRenderer).expect("generate");

    assert_eq!(generation.error_count, 0);
    assert_eq!(generation.generated_files.len(), 1);
    assert_eq!(
        fs::read(out.path().join("acme.docx")).expect("letter written"),
        b"letter"
    );
}
