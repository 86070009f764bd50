//! Shared fixtures for crate-level tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;

use crate::audit::AuditLog;
use crate::contract::{
    FilesystemAccess, IoContract, Permissions, PluginContract, PluginInfo, RuntimeKind, RuntimeSpec,
};
use crate::dispatch::{DispatchSettings, Dispatcher};
use crate::registry::ArtifactRegistry;

/// A temporary registry plus plugin repositories.
pub(crate) struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub(crate) fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn registry_dir(&self) -> PathBuf {
        self.root().join("registry")
    }

    pub(crate) fn registry(&self) -> ArtifactRegistry {
        ArtifactRegistry::open(self.registry_dir()).expect("open registry")
    }

    pub(crate) fn audit(&self) -> AuditLog {
        AuditLog::new(self.registry_dir())
    }

    /// Returns (and creates) the repository directory for `id`.
    pub(crate) fn plugin_dir(&self, id: &str) -> PathBuf {
        let dir = self.root().join("plugins").join(id);
        fs::create_dir_all(&dir).expect("create plugin dir");
        dir
    }

    /// Writes an executable file into the repository of `id`.
    pub(crate) fn write_file(&self, id: &str, name: &str, body: &str) -> PathBuf {
        let path = self.plugin_dir(id).join(name);
        fs::write(&path, body).expect("write plugin file");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod plugin file");
        path
    }

    /// Registers `contract` with its repository under `plugins/<id>`.
    pub(crate) fn register(&self, contract: PluginContract) {
        let repo = self.plugin_dir(contract.id());
        self.registry()
            .register(contract, &repo, None)
            .expect("register contract");
    }

    /// Builds a dispatcher that runs `python` entrypoints through `sh`.
    pub(crate) fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.registry(), self.audit(), &shell_settings())
    }

    /// Returns the audit event names recorded for `id`.
    pub(crate) fn audit_events(&self, id: &str) -> Vec<String> {
        self.audit()
            .read(id)
            .expect("read audit log")
            .iter()
            .filter_map(|entry| entry.event().map(str::to_owned))
            .collect()
    }
}

/// Settings whose `python` interpreter is `sh`, so test plugins are portable
/// shell scripts.
pub(crate) fn shell_settings() -> DispatchSettings {
    DispatchSettings {
        python_interpreter: String::from("sh"),
        nodejs_interpreter: String::from("sh"),
        interpreter_timeout: Duration::from_secs(10),
        ..DispatchSettings::default()
    }
}

/// Permissions that admit the direct interpreter backend.
pub(crate) fn host_permissions() -> Permissions {
    Permissions::default()
        .with_network()
        .with_filesystem(FilesystemAccess::Write)
}

/// A contract accepting any object input, with host-level permissions.
pub(crate) fn contract(id: &str, runtime: RuntimeSpec) -> PluginContract {
    PluginContract::new(
        PluginInfo::new(id, "1.0.0", id),
        runtime,
        IoContract::new(json!({ "type": "object" }), json!({ "type": "object" })),
    )
    .with_permissions(host_permissions())
}

/// A shell-script plugin run through the `python` interpreter slot.
pub(crate) fn script_plugin(workspace: &Workspace, id: &str, body: &str) -> PluginContract {
    workspace.write_file(id, "main.sh", body);
    contract(id, RuntimeSpec::new(RuntimeKind::Python, "main.sh"))
}

pub(crate) fn empty_input() -> Value {
    json!({})
}
