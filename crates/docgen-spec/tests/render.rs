use serde_json::json;

use docgen_spec::{
    FormStatus, Template, build_form_payload, evaluate, load_definition,
    package::DefinitionFormat, render_json_ui, render_text,
};

fn lease() -> Template {
    let definition = load_definition(
        include_str!("fixtures/lease.yml").as_bytes(),
        DefinitionFormat::Yaml,
    )
    .expect("fixture definition");
    Template::from_definition(&definition).expect("fixture template")
}

#[test]
fn text_render_lists_layout_before_evaluation() {
    let template = lease();
    let payload = build_form_payload(&template, None);
    assert_eq!(payload.status, FormStatus::NeedInput);

    let text = render_text(&payload);
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines[0], "Template: Residential Lease");
    assert_eq!(lines[1], "Status: need_input (0/7)");
    assert_eq!(lines[2], "Fields:");
    assert_eq!(lines[3], " - tenant (Tenant name, string) [required]");
    assert!(text.contains(" - kind (kind, enum) [required] {Lease|Sublease}"));
    assert!(text.contains(" [Guarantor]\n   - guarantor.name"));
    assert!(text.contains("[if has_guarantor]"));
    assert!(text.contains("Derived:\n - surname\n - title"));
    assert!(text.ends_with("Documents: lease.docx, guarantee.docx"));
}

#[test]
fn text_render_shows_values_and_errors() {
    let template = lease();
    let report = evaluate(
        &template,
        &json!({ "tenant": "Ada Lovelace", "kind": "Rent", "has_guarantor": "no" }),
    )
    .expect("evaluation");
    let payload = build_form_payload(&template, Some(&report));

    assert_eq!(payload.status, FormStatus::Invalid);
    assert_eq!(payload.progress.valid, 6);

    let text = render_text(&payload);
    assert!(text.contains("Status: invalid (6/7)"));
    assert!(text.contains(" - tenant (Tenant name, string) [required] = Ada Lovelace"));
    assert!(text.contains(r#"= Rent ! Value of kind must be one of: "Lease", "Sublease""#));
    assert!(text.contains(" - has_guarantor (Has a guarantor, boolean) [required] = false"));
}

#[test]
fn json_render_carries_derived_values_once_complete() {
    let template = lease();
    let report = evaluate(
        &template,
        &json!({ "tenant": "Ada Lovelace", "has_guarantor": false }),
    )
    .expect("evaluation");
    let payload = build_form_payload(&template, Some(&report));
    assert_eq!(payload.status, FormStatus::Complete);

    let ui = render_json_ui(&payload);
    assert_eq!(ui["template"], "Residential Lease");
    assert_eq!(ui["status"], "complete");
    assert_eq!(ui["progress"], json!({ "valid": 7, "total": 7 }));
    assert_eq!(ui["documents"], json!(["lease.docx", "guarantee.docx"]));

    let fields = ui["fields"].as_array().expect("fields array");
    assert_eq!(fields.len(), 7);
    assert_eq!(fields[0]["name"], "tenant");
    assert_eq!(fields[0]["placeholder"], "First and last name");
    assert_eq!(fields[0]["current_value"], "Ada Lovelace");
    assert!(fields[0]["error"].is_null());
    assert_eq!(fields[1]["options"], json!(["Lease", "Sublease"]));
    assert_eq!(fields[4]["group"], "guarantor");
    assert_eq!(fields[4]["depends_on"], "has_guarantor");

    assert_eq!(
        ui["derived"][1],
        json!({ "name": "title", "value": "Lease-LOVELACE" })
    );
    assert_eq!(ui["layout"][4]["kind"], "group");
    assert_eq!(
        ui["layout"][4]["fields"],
        json!(["guarantor.name", "guarantor.phone"])
    );
}

#[test]
fn status_labels_match_json_output() {
    assert_eq!(FormStatus::NeedInput.as_str(), "need_input");
    assert_eq!(FormStatus::Invalid.as_str(), "invalid");
    assert_eq!(FormStatus::Complete.as_str(), "complete");
}
