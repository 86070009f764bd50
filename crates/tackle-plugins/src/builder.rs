//! Plugin build step.
//!
//! A contract may declare `runtime.buildCommand`. Building runs it through
//! the configured shell in the plugin repository, stores the captured output
//! as `<id>@<version>.build.log` next to the registry artifacts, and on
//! success re-registers the contract and refreshes the discovery projection.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditLog, CancelFlag};
use crate::discovery::DiscoveryWriter;
use crate::dispatch::ExecutionFailure;
use crate::error::PluginError;
use crate::files::atomic_write;
use crate::process::run_captured;
use crate::registry::{ArtifactRegistry, RegistryArtifact};

const BUILD_TARGET: &str = "tackle_plugins::builder";

/// Runs declared build commands.
#[derive(Debug, Clone)]
pub struct PluginBuilder {
    registry: ArtifactRegistry,
    audit: AuditLog,
    discovery: DiscoveryWriter,
    shell: String,
    timeout: Duration,
}

impl PluginBuilder {
    /// Creates a builder that runs commands with `shell -c`.
    #[must_use]
    pub fn new(
        registry: ArtifactRegistry,
        audit: AuditLog,
        discovery: DiscoveryWriter,
        shell: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            audit,
            discovery,
            shell: shell.into(),
            timeout,
        }
    }

    /// Returns the build log path for `id@version`.
    #[must_use]
    pub fn log_path(&self, id: &str, version: &str) -> PathBuf {
        self.registry.root().join(format!("{id}@{version}.build.log"))
    }

    /// Builds `id` at `version`, or the latest version when omitted.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] for unknown plugins,
    /// [`PluginError::Validation`] when no build command is declared,
    /// [`PluginError::Timeout`] when the build overruns, and
    /// [`PluginError::BackendExecution`] when the command fails.
    pub fn build(&self, id: &str, version: Option<&str>) -> Result<RegistryArtifact, PluginError> {
        let artifact = self.registry.get(id, version)?;
        let contract = artifact.contract();
        let Some(command_line) = contract.runtime().build_command() else {
            return Err(PluginError::invalid(format!(
                "plugin '{}' declares no build command",
                contract.key()
            )));
        };
        let repo = artifact.repo_path();

        self.audit.record(
            contract.id(),
            &AuditEvent::BuildStart {
                cmd: command_line.to_owned(),
                repo_path: repo.display().to_string(),
            },
        )?;
        info!(target: BUILD_TARGET, plugin = %contract.key(), cmd = command_line, "build started");

        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(command_line).current_dir(repo);
        let outcome = run_captured(command, Vec::new(), self.timeout, &CancelFlag::default());

        let failure = match outcome {
            Ok(output) => {
                let log = format!("STDOUT\n{}\n\nSTDERR\n{}", output.stdout, output.stderr);
                let log_path = self.log_path(contract.id(), contract.version());
                atomic_write(&log_path, log.as_bytes())
                    .map_err(|error| PluginError::io(&log_path, error))?;
                (output.exit_code != 0).then(|| PluginError::BackendExecution {
                    plugin: contract.key(),
                    message: format!("build command exited with status {}", output.exit_code),
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            Err(ExecutionFailure::Timeout { .. }) => Some(PluginError::Timeout {
                plugin: contract.key(),
                timeout_secs: self.timeout.as_secs(),
            }),
            Err(other) => Some(PluginError::BackendExecution {
                plugin: contract.key(),
                message: other.to_string(),
                stdout: String::new(),
                stderr: String::new(),
            }),
        };

        if let Some(error) = failure {
            warn!(target: BUILD_TARGET, plugin = %contract.key(), %error, "build failed");
            self.audit.record(
                contract.id(),
                &AuditEvent::BuildFinish {
                    success: false,
                    error: Some(error.to_string()),
                },
            )?;
            return Err(error);
        }

        self.audit.record(
            contract.id(),
            &AuditEvent::BuildFinish {
                success: true,
                error: None,
            },
        )?;
        let rebuilt = self
            .registry
            .register(contract.clone(), repo, artifact.signer())?;
        self.discovery.refresh(&self.registry.list()?)?;
        info!(target: BUILD_TARGET, plugin = %contract.key(), "build finished");
        Ok(rebuilt)
    }
}
