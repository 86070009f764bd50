//! Unit tests for the CLI runtime.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;

use tackle_config::Config;

use super::*;

const ECHO_MANIFEST: &str = "\
plugin: { id: echo, version: 1.2.0, name: Echo }
runtime: { type: python, entrypoint: main.sh }
contract:
  input: { type: object, required: [text] }
  output: { type: object }
permissions: { network: true, filesystem: write }
template:
  body: '{\"text\":\"${{TEXT}}\"}'
  allowedPlaceholders: [TEXT]
";

struct FixedLoader(Config);

impl ConfigLoader for FixedLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.0.clone())
    }
}

struct Outcome {
    exit: ExitCode,
    stdout: String,
    stderr: String,
}

impl Outcome {
    fn document(&self) -> Value {
        serde_json::from_str(&self.stdout).expect("stdout is JSON")
    }

    fn error_report(&self) -> Value {
        serde_json::from_str(self.stderr.trim()).expect("stderr is JSON")
    }
}

struct Harness {
    dir: TempDir,
    loader: FixedLoader,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        let config = Config {
            registry_dir: root.join("registry"),
            discovery_path: root.join("tool-list.json"),
            log_filter: String::from("off"),
            python_interpreter: String::from("sh"),
            nodejs_interpreter: String::from("sh"),
            interpreter_timeout_secs: 10,
            ..Config::default()
        };
        Self {
            dir,
            loader: FixedLoader(config),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn plugin(&self, id: &str, manifest: &str, entrypoint: &str) -> PathBuf {
        let repo = self.root().join("plugins").join(id);
        fs::create_dir_all(&repo).expect("plugin dir");
        fs::write(repo.join("plugin.yaml"), manifest).expect("manifest");
        fs::write(repo.join("main.sh"), entrypoint).expect("entrypoint");
        repo
    }

    fn run(&self, args: &[&str]) -> Outcome {
        let mut argv = vec![OsString::from("tackle")];
        argv.extend(args.iter().map(OsString::from));
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = run_with_loader(argv, &mut stdout, &mut stderr, &self.loader);
        Outcome {
            exit,
            stdout: String::from_utf8(stdout).expect("utf-8 stdout"),
            stderr: String::from_utf8(stderr).expect("utf-8 stderr"),
        }
    }

    fn register_echo(&self) {
        let repo = self.plugin("echo", ECHO_MANIFEST, "cat\n");
        let outcome = self.run(&["register", repo.to_str().expect("utf-8 path")]);
        assert_eq!(outcome.exit, ExitCode::SUCCESS, "{}", outcome.stderr);
    }
}

#[fixture]
fn cli() -> Harness {
    Harness::new()
}

#[rstest]
fn register_then_list(cli: Harness) {
    cli.register_echo();

    let outcome = cli.run(&["list"]);
    assert_eq!(outcome.exit, ExitCode::SUCCESS);
    let listing = outcome.document();
    assert_eq!(listing["plugins"][0]["id"], json!("echo"));
    assert_eq!(listing["plugins"][0]["version"], json!("1.2.0"));
    assert_eq!(listing["plugins"][0]["runtime"], json!("python"));
    assert!(cli.root().join("tool-list.json").exists());
}

#[rstest]
fn execute_prints_the_execution_result(cli: Harness) {
    cli.register_echo();

    let outcome = cli.run(&["execute", "echo", "--input", r#"{"text":"hi"}"#]);
    assert_eq!(outcome.exit, ExitCode::SUCCESS, "{}", outcome.stderr);
    let result = outcome.document();
    assert_eq!(result["status"], json!("ok"));
    assert_eq!(result["exitCode"], json!(0));
    assert_eq!(result["output"], json!({ "text": "hi" }));
    assert_eq!(result["backend"], json!("interpreter"));
}

#[rstest]
fn failed_execution_exits_non_zero_with_the_result(cli: Harness) {
    let repo = cli.plugin(
        "grumpy",
        "plugin: { id: grumpy, version: 1.0.0, name: Grumpy }\n\
         runtime: { type: python, entrypoint: main.sh }\n\
         contract: { input: { type: object }, output: { type: object } }\n\
         permissions: { network: true, filesystem: write }\n",
        "echo no >&2\nexit 4\n",
    );
    cli.run(&["register", repo.to_str().expect("utf-8 path")]);

    let outcome = cli.run(&["execute", "grumpy"]);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    let result = outcome.document();
    assert_eq!(result["status"], json!("error"));
    assert_eq!(result["exitCode"], json!(4));
}

#[rstest]
fn render_fills_the_template(cli: Harness) {
    cli.register_echo();

    let outcome = cli.run(&["render", "echo", "--props", r#"{"TEXT":"say \"hi\""}"#]);
    assert_eq!(outcome.exit, ExitCode::SUCCESS, "{}", outcome.stderr);
    let rendered = outcome.document();
    let body: Value = serde_json::from_str(
        rendered["result"]["renderedJson"]
            .as_str()
            .expect("rendered JSON text"),
    )
    .expect("rendered body is JSON");
    assert_eq!(body, json!({ "text": "say \"hi\"" }));
}

#[rstest]
fn verify_denies_unknown_tools(cli: Harness) {
    let outcome = cli.run(&["verify", "ghost", "1.0.0", "--args", r#"{"a":1}"#]);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    let verdict = outcome.document();
    assert_eq!(verdict["approved"], json!(false));
    assert!(
        verdict["reason"]
            .as_str()
            .is_some_and(|reason| reason.contains("not found")),
        "{verdict}"
    );
}

#[rstest]
fn verify_denies_an_empty_invocation_id(cli: Harness) {
    cli.register_echo();

    let outcome = cli.run(&[
        "verify",
        "echo",
        "1.2.0",
        "--args",
        r#"{"text":"hi"}"#,
        "--invocation-id",
        "",
    ]);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    let verdict = outcome.document();
    assert_eq!(verdict["approved"], json!(false));
    assert!(
        verdict["reason"]
            .as_str()
            .is_some_and(|reason| reason.starts_with("Malformed invocation")),
        "{verdict}"
    );
}

#[rstest]
#[case::unknown_plugin(&["execute", "nobody"], 404)]
#[case::malformed_input(&["execute", "nobody", "--input", "{oops"], 400)]
#[case::props_not_object(&["render", "nobody", "--props", "[1]"], 400)]
#[case::build_unknown(&["build", "nobody"], 404)]
fn failures_are_reported_as_json(cli: Harness, #[case] args: &[&str], #[case] status: u16) {
    let outcome = cli.run(args);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stdout.is_empty());
    assert_eq!(outcome.error_report()["status"], json!(status));
}

#[rstest]
fn help_goes_to_stdout(cli: Harness) {
    let outcome = cli.run(&["--help"]);
    assert_eq!(outcome.exit, ExitCode::SUCCESS);
    assert!(outcome.stdout.contains("execute"));
}

#[rstest]
fn unknown_subcommands_are_usage_errors(cli: Harness) {
    let outcome = cli.run(&["launch"]);
    assert_eq!(outcome.exit, ExitCode::from(2));
    assert!(!outcome.stderr.is_empty());
}
