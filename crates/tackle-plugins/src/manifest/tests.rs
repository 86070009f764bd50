//! Unit tests for manifest normalisation.

use std::fs;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signer, SigningKey};
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;

use super::*;
use crate::contract::{Adapter, FilesystemAccess};

const ECHO_MANIFEST: &str = r#"
plugin:
  id: echo
  version: 1.2.0
  name: Echo
runtime:
  type: python
  entrypoint: main.py
  build: pip install -r requirements.txt
contract:
  input:
    type: object
    required: [text]
    properties:
      text: { type: string }
  output:
    type: object
permissions:
  filesystem: read
"#;

#[fixture]
fn repo() -> TempDir {
    TempDir::new().expect("temp dir")
}

fn write_manifest(repo: &TempDir, text: &str) {
    fs::write(repo.path().join(MANIFEST_FILE), text).expect("write manifest");
}

fn base_document() -> Value {
    json!({
        "plugin": { "id": "echo", "version": "1.0.0", "name": "Echo" },
        "runtime": { "type": "binary", "entrypoint": "run.sh" },
        "contract": { "input": { "type": "object" }, "output": { "type": "object" } }
    })
}

fn sign(document: &mut Value, key: &SigningKey) {
    let signature = key.sign(signing_payload(document).as_bytes());
    document["signature"] = json!(STANDARD.encode(signature.to_bytes()));
    document["signer"] = json!(STANDARD.encode(key.verifying_key().to_bytes()));
}

// ---------------------------------------------------------------------------
// Parsing and defaults
// ---------------------------------------------------------------------------

#[rstest]
fn yaml_manifest_normalises_with_defaults(repo: TempDir) {
    write_manifest(&repo, ECHO_MANIFEST);
    let manifest = ManifestNormalizer::default()
        .normalize(repo.path())
        .expect("manifest normalises");
    let contract = manifest.contract();

    assert_eq!(contract.key(), "echo@1.2.0");
    assert_eq!(contract.runtime().build_command(), Some("pip install -r requirements.txt"));
    assert_eq!(contract.permissions().filesystem(), FilesystemAccess::Read);
    assert_eq!(contract.ui(), &json!({}));
    assert_eq!(contract.metadata(), &json!({}));
    assert!(contract.hash_matches().expect("hash"));
    assert!(manifest.signer().is_none());
}

#[rstest]
fn missing_manifest_is_an_io_error(repo: TempDir) {
    let error = ManifestNormalizer::default()
        .normalize(repo.path())
        .expect_err("manifest is missing");
    assert!(matches!(error, PluginError::Io { .. }), "got {error:?}");
}

#[rstest]
fn malformed_yaml_is_a_validation_error(repo: TempDir) {
    write_manifest(&repo, "plugin: [unterminated");
    let error = ManifestNormalizer::default()
        .normalize(repo.path())
        .expect_err("yaml is malformed");
    assert!(matches!(error, PluginError::Validation { .. }), "got {error:?}");
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn every_structural_violation_is_reported() {
    let document = json!({
        "plugin": { "id": "Bad Id", "version": "1.0", "name": "" },
        "runtime": { "type": "cobol" }
    });
    let error = ManifestNormalizer::default()
        .normalize_document(&document, Path::new("."))
        .expect_err("document is invalid");

    let PluginError::Validation { violations } = error else {
        panic!("expected validation error, got {error:?}");
    };
    // id pattern, version pattern, empty name, runtime type, missing
    // entrypoint, missing contract.
    assert!(violations.len() >= 6, "violations: {violations:?}");
}

#[rstest]
#[case::docker_without_adapter(
    json!({ "type": "docker", "entrypoint": "run.sh" }),
    "docker adapter"
)]
#[case::http_without_host(
    json!({ "type": "http", "entrypoint": "-", "adapter": { "type": "http" } }),
    "requires a host"
)]
#[case::in_process_python(
    json!({ "type": "python", "entrypoint": "main.py", "inProcess": true }),
    "only available to nodejs"
)]
#[case::absolute_entrypoint(
    json!({ "type": "binary", "entrypoint": "/bin/sh" }),
    "inside the plugin repository"
)]
#[case::parent_entrypoint(
    json!({ "type": "python", "entrypoint": "../other/main.py" }),
    "inside the plugin repository"
)]
fn semantic_rules_are_enforced(#[case] runtime: Value, #[case] expected: &str) {
    let mut document = base_document();
    document["runtime"] = runtime;
    let error = ManifestNormalizer::default()
        .normalize_document(&document, Path::new("."))
        .expect_err("document is invalid");

    let PluginError::Validation { violations } = error else {
        panic!("expected validation error, got {error:?}");
    };
    assert!(
        violations.iter().any(|violation| violation.contains(expected)),
        "violations: {violations:?}"
    );
}

#[test]
fn adapters_are_carried_into_the_contract() {
    let mut document = base_document();
    document["runtime"] = json!({
        "type": "http",
        "entrypoint": "-",
        "adapter": { "type": "http", "host": "localhost:9000" }
    });
    let manifest = ManifestNormalizer::default()
        .normalize_document(&document, Path::new("."))
        .expect("document is valid");
    assert_eq!(
        manifest.contract().runtime().adapter(),
        Some(&Adapter::Http {
            host: "localhost:9000".into()
        })
    );
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[rstest]
fn template_path_is_inlined(repo: TempDir) {
    fs::write(repo.path().join("invoke.json"), r#"{"q":"${{Q}}"}"#).expect("write template");
    let mut document = base_document();
    document["template"] = json!({ "path": "invoke.json", "allowedPlaceholders": ["Q"] });

    let manifest = ManifestNormalizer::default()
        .normalize_document(&document, repo.path())
        .expect("document is valid");
    let template = manifest.contract().template().expect("template present");
    assert_eq!(template.body(), r#"{"q":"${{Q}}"}"#);
    assert_eq!(template.allowed_placeholders(), ["Q".to_owned()]);
}

#[rstest]
fn template_path_cannot_escape_repository(repo: TempDir) {
    let inner = repo.path().join("plugin");
    fs::create_dir(&inner).expect("create plugin dir");
    fs::write(repo.path().join("secret.json"), "{}").expect("write outside file");
    let mut document = base_document();
    document["template"] = json!({ "path": "../secret.json", "allowedPlaceholders": [] });

    let error = ManifestNormalizer::default()
        .normalize_document(&document, &inner)
        .expect_err("path escapes");
    assert!(error.to_string().contains("escapes"), "{error}");
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

#[test]
fn valid_signature_is_accepted_and_reported() {
    let key = SigningKey::from_bytes(&[7; 32]);
    let mut document = base_document();
    sign(&mut document, &key);

    let manifest = ManifestNormalizer::new(SignaturePolicy::new(true))
        .normalize_document(&document, Path::new("."))
        .expect("signature verifies");
    assert_eq!(
        manifest.signer(),
        Some(STANDARD.encode(key.verifying_key().to_bytes()).as_str())
    );
}

#[test]
fn tampered_manifest_is_rejected() {
    let key = SigningKey::from_bytes(&[7; 32]);
    let mut document = base_document();
    sign(&mut document, &key);
    document["plugin"]["name"] = json!("Tampered");

    let error = ManifestNormalizer::default()
        .normalize_document(&document, Path::new("."))
        .expect_err("signature must fail");
    assert!(matches!(error, PluginError::Signature { .. }), "got {error:?}");
}

#[test]
fn unsigned_manifest_rejected_when_required() {
    let error = ManifestNormalizer::new(SignaturePolicy::new(true))
        .normalize_document(&base_document(), Path::new("."))
        .expect_err("unsigned manifest");
    assert!(error.to_string().contains("unsigned"), "{error}");
}

#[test]
fn untrusted_signer_is_rejected() {
    let key = SigningKey::from_bytes(&[7; 32]);
    let mut document = base_document();
    sign(&mut document, &key);
    let policy = SignaturePolicy::new(false).with_trusted_signers(vec!["c29tZW9uZSBlbHNl".into()]);

    let error = ManifestNormalizer::new(policy)
        .normalize_document(&document, Path::new("."))
        .expect_err("signer not trusted");
    assert!(error.to_string().contains("trusted"), "{error}");
}

#[test]
fn signature_without_signer_is_rejected() {
    let mut document = base_document();
    document["signature"] = json!("AAAA");
    let error = ManifestNormalizer::default()
        .normalize_document(&document, Path::new("."))
        .expect_err("signer missing");
    assert!(matches!(error, PluginError::Signature { .. }), "got {error:?}");
}

#[test]
fn signing_payload_ignores_signature_fields_and_key_order() {
    let mut signed = base_document();
    signed["signature"] = json!("x");
    signed["signer"] = json!("y");
    let reordered: Value = serde_json::from_str(
        r#"{"contract":{"output":{"type":"object"},"input":{"type":"object"}},
            "runtime":{"entrypoint":"run.sh","type":"binary"},
            "plugin":{"name":"Echo","version":"1.0.0","id":"echo"}}"#,
    )
    .expect("valid json");
    assert_eq!(signing_payload(&signed), signing_payload(&reordered));
}
