//! Unit tests for the template renderer.

use rstest::{fixture, rstest};
use serde_json::{Map, Value, json};

use super::*;

const SEARCH_TEMPLATE: &str =
    r#"{"query":"${{QUERY}}","limit":${{LIMIT}},"is_active":${{IS_ACTIVE}}}"#;

#[fixture]
fn allowed() -> Vec<String> {
    vec!["QUERY".into(), "LIMIT".into(), "IS_ACTIVE".into()]
}

fn props(value: Value) -> Map<String, Value> {
    serde_json::from_value(value).expect("props must be an object")
}

#[rstest]
fn search_template_renders_typed_values(allowed: Vec<String>) {
    let rendered = render(
        SEARCH_TEMPLATE,
        &props(json!({ "QUERY": "search for cats", "LIMIT": 20, "IS_ACTIVE": true })),
        &allowed,
    )
    .expect("template renders");

    assert_eq!(
        rendered.to_value().expect("valid json"),
        json!({ "query": "search for cats", "limit": 20, "is_active": true })
    );
    assert_eq!(rendered.used_placeholders(), ["QUERY", "LIMIT", "IS_ACTIVE"]);
}

#[rstest]
fn quotes_and_backslashes_round_trip(allowed: Vec<String>) {
    let tricky = r#"a "quoted" string with a \ backslash"#;
    let rendered = render(
        SEARCH_TEMPLATE,
        &props(json!({ "QUERY": tricky, "LIMIT": 5, "IS_ACTIVE": false })),
        &allowed,
    )
    .expect("template renders");

    assert_eq!(rendered.to_value().expect("valid json")["query"], json!(tricky));
}

#[rstest]
fn disallowed_placeholder_fails_even_with_a_prop(allowed: Vec<String>) {
    let error = render(
        r#"{"danger":"${{UNAUTHORIZED}}"}"#,
        &props(json!({ "UNAUTHORIZED": "hacked" })),
        &allowed,
    )
    .expect_err("placeholder must be rejected");

    assert_eq!(error.to_string(), "placeholder {{UNAUTHORIZED}} is not allowed");
}

#[rstest]
fn disallowed_placeholder_is_reported_before_missing_values(allowed: Vec<String>) {
    let error = render(r#"{"a":${{LIMIT}},"b":"${{OTHER}}"}"#, &Map::new(), &allowed)
        .expect_err("placeholder must be rejected");
    assert!(
        matches!(error, TemplateError::PlaceholderNotAllowed { ref name } if name == "OTHER"),
        "got {error:?}"
    );
}

#[rstest]
fn missing_prop_is_named(allowed: Vec<String>) {
    let error = render(SEARCH_TEMPLATE, &props(json!({ "QUERY": "dogs" })), &allowed)
        .expect_err("LIMIT is missing");
    assert_eq!(error.to_string(), "missing value for placeholder: LIMIT");
}

#[rstest]
fn whitespace_inside_placeholders_is_trimmed(allowed: Vec<String>) {
    let rendered = render(r#"{"n":${{ LIMIT }}}"#, &props(json!({ "LIMIT": 3 })), &allowed)
        .expect("template renders");
    assert_eq!(rendered.rendered_json(), r#"{"n":3}"#);
}

#[rstest]
#[case::object_value(json!({ "k": [1, 2] }), json!({ "v": { "k": [1, 2] } }))]
#[case::string_value(json!("plain"), json!({ "v": "plain" }))]
#[case::null_value(Value::Null, json!({ "v": null }))]
fn value_position_receives_full_json(#[case] prop: Value, #[case] expected: Value) {
    let rendered = render(r#"{"v":${{V}}}"#, &props(json!({ "V": prop })), &["V".to_owned()])
        .expect("template renders");
    assert_eq!(rendered.to_value().expect("valid json"), expected);
}

#[test]
fn numbers_inside_strings_are_stringified() {
    let rendered = render(
        r#"{"label":"page ${{N}} of \"${{T}}\""}"#,
        &props(json!({ "N": 2, "T": "a\"b" })),
        &["N".to_owned(), "T".to_owned()],
    )
    .expect("template renders");
    assert_eq!(
        rendered.to_value().expect("valid json"),
        json!({ "label": "page 2 of \"a\"b\"" })
    );
}

#[test]
fn invalid_json_after_substitution_is_rejected() {
    let error = render(r#"{"v": ${{V}}"#, &props(json!({ "V": 1 })), &["V".to_owned()])
        .expect_err("unbalanced braces");
    assert_eq!(error.to_string(), "rendered template is not valid JSON");
}

#[test]
fn oversized_template_is_rejected() {
    let big = format!(r#"{{"v":"{}"}}"#, "x".repeat(MAX_TEMPLATE_BYTES));
    let error = render(&big, &Map::new(), &[]).expect_err("too large");
    assert!(matches!(error, TemplateError::TemplateTooLarge { .. }), "got {error:?}");
}

#[test]
fn oversized_output_is_rejected() {
    let props = props(json!({ "V": "x".repeat(MAX_TEMPLATE_BYTES) }));
    let error = render(r#"{"v":"${{V}}"}"#, &props, &["V".to_owned()]).expect_err("too large");
    assert!(matches!(error, TemplateError::OutputTooLarge { .. }), "got {error:?}");
}

#[test]
fn repeated_large_props_stop_at_the_output_limit() {
    let slots = vec![r#""${{A}}""#; 100_000].join(",");
    let template = format!(r#"{{"v":[{slots}]}}"#);
    assert!(template.len() < MAX_TEMPLATE_BYTES);
    let props = props(json!({ "A": "x".repeat(600_000) }));

    let error = render(&template, &props, &["A".to_owned()]).expect_err("too large");
    let TemplateError::OutputTooLarge { size } = error else {
        panic!("expected OutputTooLarge, got {error:?}");
    };
    assert!(size <= MAX_TEMPLATE_BYTES * 2, "stopped late at {size} bytes");
}

// ---------------------------------------------------------------------------
// safe_render
// ---------------------------------------------------------------------------

#[rstest]
fn safe_render_validates_props_against_schema(allowed: Vec<String>) {
    let schema = json!({
        "type": "object",
        "properties": { "LIMIT": { "type": "integer", "maximum": 100 } },
        "required": ["LIMIT"]
    });
    let outcome = safe_render(
        SEARCH_TEMPLATE,
        &props(json!({ "QUERY": "q", "LIMIT": 500, "IS_ACTIVE": true })),
        &allowed,
        Some(&schema),
    );
    let message = outcome.error().expect("props must be rejected");
    assert!(message.starts_with("invalid props"), "{message}");
}

#[rstest]
fn safe_render_captures_render_errors(allowed: Vec<String>) {
    let outcome = safe_render(SEARCH_TEMPLATE, &Map::new(), &allowed, None);
    assert_eq!(outcome.error(), Some("missing value for placeholder: QUERY"));
    assert!(outcome.rendered().is_none());
}

#[rstest]
fn safe_render_serialises_as_result_or_error(allowed: Vec<String>) {
    let ok = safe_render(
        SEARCH_TEMPLATE,
        &props(json!({ "QUERY": "q", "LIMIT": 1, "IS_ACTIVE": true })),
        &allowed,
        None,
    );
    let encoded = serde_json::to_value(&ok).expect("encode");
    assert!(encoded["result"]["renderedJson"].is_string());

    let failed = RenderOutcome::Failed("boom".into());
    assert_eq!(serde_json::to_value(&failed).expect("encode"), json!({ "error": "boom" }));
}
