//! Crate-level integration and BDD tests.

use serde_json::json;

use crate::dispatch::{ExecuteRequest, ExecutionStatus};
use crate::host::{HostSettings, PluginHost};
use crate::invocation::Invocation;
use crate::manifest::MANIFEST_FILE;

mod behaviour;
pub(crate) mod support;

use self::support::{Workspace, shell_settings};

#[test]
fn manifest_to_execution_end_to_end() {
    let workspace = Workspace::new();
    let repo = workspace.plugin_dir("shout");
    std::fs::write(
        repo.join(MANIFEST_FILE),
        "plugin: { id: shout, version: 0.3.0, name: Shout }\n\
         runtime: { type: python, entrypoint: main.sh }\n\
         contract:\n  input: { type: object, required: [text] }\n  output: { type: object }\n\
         permissions: { network: true, filesystem: write }\n",
    )
    .expect("write manifest");
    workspace.write_file(
        "shout",
        "main.sh",
        "read -r line\nprintf '{\"echo\":%s}' \"$line\"\n",
    );
    let settings = HostSettings {
        dispatch: shell_settings(),
        ..HostSettings::new(workspace.registry_dir(), workspace.root().join("tool-list.json"))
    };
    let host = PluginHost::open(&settings).expect("open host");

    host.register(&repo).expect("register");
    let invocation = Invocation::new("shout", "0.3.0", "inv-e2e", json!({ "text": "hey" }))
        .expect("invocation");
    assert!(host.verify(&invocation, "trace-e2e").approved());

    let request = ExecuteRequest::new("shout", json!({ "text": "hey" })).with_version("0.3.0");
    let result = host.execute(&request).expect("execute");
    assert_eq!(result.status(), ExecutionStatus::Ok);
    assert_eq!(result.output(), Some(&json!({ "echo": { "text": "hey" } })));

    let events = workspace.audit_events("shout");
    assert_eq!(events.first().map(String::as_str), Some("register"));
    assert_eq!(events.last().map(String::as_str), Some("execute_complete"));
}
