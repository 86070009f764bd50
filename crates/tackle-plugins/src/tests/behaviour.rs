//! Behaviour-driven tests for the plugin pipeline.

use std::cell::RefCell;
use std::fs;
use std::path::Path;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Map, Value, json};

use crate::contract::{RuntimeKind, RuntimeSpec};
use crate::dispatch::{ExecuteRequest, ExecutionResult, FailureKind};
use crate::invocation::Invocation;
use crate::manifest::{MANIFEST_FILE, ManifestNormalizer};
use crate::registry::RegistryArtifact;
use crate::template::{RenderedTemplate, render};
use crate::verifier::{Verdict, Verifier};

use super::support::{Workspace, contract};

// ---------------------------------------------------------------------------
// Test world
// ---------------------------------------------------------------------------

const SEARCH_TEMPLATE: &str =
    r#"{"query":"${{QUERY}}","limit":${{LIMIT}},"is_active":${{IS_ACTIVE}}}"#;

struct TestWorld {
    workspace: Workspace,
    repo: Option<String>,
    template: String,
    result: Option<ExecutionResult>,
    verdict: Option<Verdict>,
    rendered: Option<RenderedTemplate>,
    artifact: Option<RegistryArtifact>,
}

impl TestWorld {
    fn new() -> Self {
        Self {
            workspace: Workspace::new(),
            repo: None,
            template: String::new(),
            result: None,
            verdict: None,
            rendered: None,
            artifact: None,
        }
    }

    fn result(&self) -> &ExecutionResult {
        self.result.as_ref().expect("no execution result captured")
    }

    fn verdict(&self) -> &Verdict {
        self.verdict.as_ref().expect("no verdict captured")
    }

    fn rendered_value(&self) -> Value {
        self.rendered
            .as_ref()
            .expect("no rendered template captured")
            .to_value()
            .expect("rendered template is JSON")
    }

    fn pid_file(&self, id: &str) -> std::path::PathBuf {
        self.workspace.plugin_dir(id).join("pid")
    }
}

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

fn register_shell_plugin(world: &TestWorld, id: &str, body: &str, runtime: RuntimeSpec) {
    world.workspace.write_file(id, "main.sh", body);
    world.workspace.register(contract(id, runtime));
}

// ---------------------------------------------------------------------------
// Given steps
// ---------------------------------------------------------------------------

#[given("a registered interpreter plugin {id} that prints an ok document")]
fn given_ok_plugin(world: &RefCell<TestWorld>, id: String) {
    let state = world.borrow();
    register_shell_plugin(
        &state,
        id.trim_matches('"'),
        "cat > /dev/null\necho '{\"ok\":true}'\n",
        RuntimeSpec::new(RuntimeKind::Python, "main.sh"),
    );
}

#[given("a registered interpreter plugin {id} that sleeps with a {secs} second timeout")]
fn given_sleepy_plugin(world: &RefCell<TestWorld>, id: String, secs: u64) {
    let state = world.borrow();
    let plugin = id.trim_matches('"');
    let body = format!("echo $$ > {}\nsleep 30\n", state.pid_file(plugin).display());
    register_shell_plugin(
        &state,
        plugin,
        &body,
        RuntimeSpec::new(RuntimeKind::Python, "main.sh").with_timeout_secs(secs),
    );
}

#[given("an empty registry")]
fn given_empty_registry(world: &RefCell<TestWorld>) {
    assert!(world.borrow().workspace.registry().list().expect("list").is_empty());
}

#[given("the search template")]
fn given_search_template(world: &RefCell<TestWorld>) {
    world.borrow_mut().template = String::from(SEARCH_TEMPLATE);
}

#[given("a plugin repository {id} with a valid manifest")]
fn given_manifest_repo(world: &RefCell<TestWorld>, id: String) {
    let mut state = world.borrow_mut();
    let plugin = id.trim_matches('"');
    let repo = state.workspace.plugin_dir(plugin);
    let manifest = format!(
        "plugin:\n  id: {plugin}\n  version: 2.1.0\n  name: Hashed\n\
         runtime:\n  type: nodejs\n  entrypoint: index.js\n\
         contract:\n  input: {{ type: object }}\n  output: {{ type: object }}\n\
         metadata:\n  tags: [demo, hashing]\n"
    );
    fs::write(repo.join(MANIFEST_FILE), manifest).expect("write manifest");
    state.repo = Some(repo.display().to_string());
}

// ---------------------------------------------------------------------------
// When steps
// ---------------------------------------------------------------------------

#[when("plugin {id} is executed")]
fn when_executed(world: &RefCell<TestWorld>, id: String) {
    let mut state = world.borrow_mut();
    let request = ExecuteRequest::new(id.trim_matches('"'), json!({}));
    let result = state
        .workspace
        .dispatcher()
        .execute(&request)
        .expect("dispatch accepted");
    state.result = Some(result);
}

#[when("tool {id} version {version} is verified")]
fn when_verified(world: &RefCell<TestWorld>, id: String, version: String) {
    let mut state = world.borrow_mut();
    let invocation = Invocation::new(
        id.trim_matches('"'),
        version.trim_matches('"'),
        "inv-bdd",
        json!({ "text": "hello" }),
    )
    .expect("invocation");
    let verdict = Verifier::new(state.workspace.registry()).verify(&invocation, "trace-bdd");
    state.verdict = Some(verdict);
}

#[when("it is rendered with query {query}, limit {limit} and active {active}")]
fn when_rendered(world: &RefCell<TestWorld>, query: String, limit: u64, active: bool) {
    let mut state = world.borrow_mut();
    let mut props = Map::new();
    props.insert("QUERY".into(), json!(query.trim_matches('"')));
    props.insert("LIMIT".into(), json!(limit));
    props.insert("IS_ACTIVE".into(), json!(active));
    let allowed = ["QUERY".to_owned(), "LIMIT".to_owned(), "IS_ACTIVE".to_owned()];
    let rendered = render(&state.template, &props, &allowed).expect("template renders");
    state.rendered = Some(rendered);
}

#[when("the repository is registered")]
fn when_registered(world: &RefCell<TestWorld>) {
    let mut state = world.borrow_mut();
    let repo = state.repo.clone().expect("repository prepared");
    let (contract, signer) = ManifestNormalizer::default()
        .normalize(Path::new(&repo))
        .expect("manifest normalises")
        .into_parts();
    let registry = state.workspace.registry();
    let registered = registry
        .register(contract, Path::new(&repo), signer.as_deref())
        .expect("register");
    let stored = registry
        .get(registered.contract().id(), Some(registered.contract().version()))
        .expect("stored artifact");
    state.artifact = Some(stored);
}

// ---------------------------------------------------------------------------
// Then steps
// ---------------------------------------------------------------------------

#[then("the result status is {status}")]
fn then_status(world: &RefCell<TestWorld>, status: String) {
    let state = world.borrow();
    assert_eq!(state.result().status().as_str(), status.trim_matches('"'));
}

#[then("the result exit code is {code}")]
fn then_exit_code(world: &RefCell<TestWorld>, code: i32) {
    assert_eq!(world.borrow().result().exit_code(), code);
}

#[then("the result output field {field} is true")]
fn then_output_field(world: &RefCell<TestWorld>, field: String) {
    let state = world.borrow();
    let output = state.result().output().expect("structured output");
    assert_eq!(output.get(field.trim_matches('"')), Some(&json!(true)));
}

#[then("the result is classified as a timeout")]
fn then_timeout(world: &RefCell<TestWorld>) {
    assert_eq!(world.borrow().result().failure(), Some(FailureKind::Timeout));
}

#[then("the plugin process is no longer running")]
fn then_process_gone(world: &RefCell<TestWorld>) {
    let state = world.borrow();
    let pid = fs::read_to_string(state.pid_file("sleepy")).expect("pid recorded");
    assert!(
        !Path::new(&format!("/proc/{}", pid.trim())).exists(),
        "process {} still running",
        pid.trim()
    );
}

#[then("the verdict is not approved")]
fn then_denied(world: &RefCell<TestWorld>) {
    assert!(!world.borrow().verdict().approved());
}

#[then("the verdict reason mentions {text}")]
fn then_reason(world: &RefCell<TestWorld>, text: String) {
    let state = world.borrow();
    let expected = text.trim_matches('"');
    assert!(
        state.verdict().reason().contains(expected),
        "reason was {}",
        state.verdict().reason()
    );
}

#[then("the verdict confidence is low")]
fn then_low_confidence(world: &RefCell<TestWorld>) {
    assert!(world.borrow().verdict().confidence_score() < 0.5);
}

#[then("the rendered query is {query}")]
fn then_rendered_query(world: &RefCell<TestWorld>, query: String) {
    assert_eq!(
        world.borrow().rendered_value()["query"],
        json!(query.trim_matches('"'))
    );
}

#[then("the rendered limit is {limit}")]
fn then_rendered_limit(world: &RefCell<TestWorld>, limit: u64) {
    assert_eq!(world.borrow().rendered_value()["limit"], json!(limit));
}

#[then("the rendered active flag is {active}")]
fn then_rendered_active(world: &RefCell<TestWorld>, active: bool) {
    assert_eq!(world.borrow().rendered_value()["is_active"], json!(active));
}

#[then("the stored contract hash matches a fresh computation")]
fn then_hash_matches(world: &RefCell<TestWorld>) {
    let state = world.borrow();
    let artifact = state.artifact.as_ref().expect("artifact stored");
    assert_eq!(
        artifact.contract().compute_hash().expect("hash"),
        artifact.content_hash()
    );
    assert!(artifact.contract().hash_matches().expect("hash"));
}

// ---------------------------------------------------------------------------
// Scenario registration
// ---------------------------------------------------------------------------

#[scenario(path = "tests/features/plugin_pipeline.feature", index = 0)]
fn interpreter_output_is_structured(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/plugin_pipeline.feature", index = 1)]
fn timeouts_terminate_the_plugin(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/plugin_pipeline.feature", index = 2)]
fn unregistered_tools_are_denied(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/plugin_pipeline.feature", index = 3)]
fn search_template_renders(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/plugin_pipeline.feature", index = 4)]
fn registered_hash_is_verifiable(world: RefCell<TestWorld>) {
    let _ = world;
}
