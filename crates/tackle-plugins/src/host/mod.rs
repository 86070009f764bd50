//! Facade wiring the pipeline components together.
//!
//! [`PluginHost`] owns one registry, audit log, session tracker, and
//! discovery projection, and exposes the pipeline entry points: register,
//! build, list, render, verify, and execute. Nothing here is global; callers
//! construct a host from [`HostSettings`] and pass it where it is needed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditLog, SessionTracker};
use crate::builder::PluginBuilder;
use crate::discovery::DiscoveryWriter;
use crate::dispatch::{DispatchSettings, Dispatcher, ExecuteRequest, ExecutionResult};
use crate::error::PluginError;
use crate::invocation::Invocation;
use crate::manifest::{ManifestNormalizer, SignaturePolicy};
use crate::registry::{ArtifactRegistry, RegistryArtifact};
use crate::template::{RenderOutcome, safe_render};
use crate::verifier::{PlausibilityPolicy, Verdict, Verifier};

const HOST_TARGET: &str = "tackle_plugins::host";

/// Settings for a [`PluginHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    /// Directory holding artifacts, audit logs, and build logs.
    pub registry_dir: PathBuf,
    /// Path of the discovery projection.
    pub discovery_path: PathBuf,
    /// Reject manifests without a valid signature.
    pub require_signatures: bool,
    /// Base64 public keys accepted as signers; empty accepts any valid key.
    pub trusted_signers: Vec<String>,
    /// Build automatically on registration when a build command exists.
    pub auto_build: bool,
    /// Shell used for build commands.
    pub shell: String,
    /// Wall-clock limit for builds.
    pub build_timeout: Duration,
    /// Backend tunables.
    pub dispatch: DispatchSettings,
}

impl HostSettings {
    /// Creates settings with default tunables.
    #[must_use]
    pub fn new(registry_dir: impl Into<PathBuf>, discovery_path: impl Into<PathBuf>) -> Self {
        Self {
            registry_dir: registry_dir.into(),
            discovery_path: discovery_path.into(),
            require_signatures: false,
            trusted_signers: Vec::new(),
            auto_build: true,
            shell: String::from("sh"),
            build_timeout: Duration::from_secs(300),
            dispatch: DispatchSettings::default(),
        }
    }
}

/// Entry point to the plugin pipeline.
#[derive(Debug)]
pub struct PluginHost {
    normalizer: ManifestNormalizer,
    registry: ArtifactRegistry,
    audit: AuditLog,
    discovery: DiscoveryWriter,
    builder: PluginBuilder,
    verifier: Verifier,
    dispatcher: Dispatcher,
    auto_build: bool,
}

impl PluginHost {
    /// Opens the registry and assembles the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the registry directory cannot be
    /// created.
    pub fn open(settings: &HostSettings) -> Result<Self, PluginError> {
        let registry = ArtifactRegistry::open(settings.registry_dir.clone())?;
        let audit = AuditLog::new(registry.root());
        let discovery = DiscoveryWriter::new(settings.discovery_path.clone());
        let policy = SignaturePolicy::new(settings.require_signatures)
            .with_trusted_signers(settings.trusted_signers.clone());

        Ok(Self {
            normalizer: ManifestNormalizer::new(policy),
            builder: PluginBuilder::new(
                registry.clone(),
                audit.clone(),
                discovery.clone(),
                settings.shell.as_str(),
                settings.build_timeout,
            ),
            verifier: Verifier::new(registry.clone()),
            dispatcher: Dispatcher::new(registry.clone(), audit.clone(), &settings.dispatch),
            registry,
            audit,
            discovery,
            auto_build: settings.auto_build,
        })
    }

    /// Replaces the verifier's plausibility policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn PlausibilityPolicy>) -> Self {
        self.verifier = Verifier::with_policy(self.registry.clone(), policy);
        self
    }

    /// Replaces the dispatcher, e.g. to install a custom backend.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Normalises and registers the plugin repository at `repo`.
    ///
    /// When a build command is declared and automatic builds are enabled the
    /// build runs immediately; its outcome is audited as
    /// `build_auto_triggered` and never fails the registration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Validation`] or [`PluginError::Signature`] for
    /// rejected manifests and [`PluginError::Io`] for storage failures.
    pub fn register(&self, repo: &Path) -> Result<RegistryArtifact, PluginError> {
        let (contract, signer) = self.normalizer.normalize(repo)?.into_parts();
        let artifact = self.registry.register(contract, repo, signer.as_deref())?;
        self.discovery.refresh(&self.registry.list()?)?;

        let id = artifact.contract().id();
        self.audit.record(
            id,
            &AuditEvent::Register {
                repo_path: repo.display().to_string(),
                artifact_hash: artifact.content_hash().to_owned(),
            },
        )?;
        info!(
            target: HOST_TARGET,
            plugin = %artifact.contract().key(),
            hash = artifact.content_hash(),
            "plugin registered"
        );

        if self.auto_build && artifact.contract().runtime().build_command().is_some() {
            let event = match self.builder.build(id, Some(artifact.contract().version())) {
                Ok(_) => AuditEvent::BuildAutoTriggered {
                    status: String::from("ok"),
                    error: None,
                },
                Err(error) => {
                    warn!(target: HOST_TARGET, plugin = id, %error, "automatic build failed");
                    AuditEvent::BuildAutoTriggered {
                        status: String::from("error"),
                        error: Some(error.to_string()),
                    }
                }
            };
            self.audit.record(id, &event)?;
        }
        Ok(artifact)
    }

    /// Runs the declared build command of `id`.
    ///
    /// # Errors
    ///
    /// See [`PluginBuilder::build`].
    pub fn build(&self, id: &str, version: Option<&str>) -> Result<RegistryArtifact, PluginError> {
        self.builder.build(id, version)
    }

    /// Returns a registered artifact.
    ///
    /// # Errors
    ///
    /// See [`ArtifactRegistry::get`].
    pub fn get(&self, id: &str, version: Option<&str>) -> Result<RegistryArtifact, PluginError> {
        self.registry.get(id, version)
    }

    /// Lists every registered artifact.
    ///
    /// # Errors
    ///
    /// See [`ArtifactRegistry::list`].
    pub fn list(&self) -> Result<Vec<RegistryArtifact>, PluginError> {
        self.registry.list()
    }

    /// Renders the template declared by `id` with `props`.
    ///
    /// Rendering faults are reported inside the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] for unknown plugins and
    /// [`PluginError::Validation`] when the plugin declares no template.
    pub fn render(
        &self,
        id: &str,
        version: Option<&str>,
        props: &Map<String, Value>,
    ) -> Result<RenderOutcome, PluginError> {
        let artifact = self.registry.get(id, version)?;
        let Some(template) = artifact.contract().template() else {
            return Err(PluginError::invalid(format!(
                "plugin '{}' declares no template",
                artifact.contract().key()
            )));
        };
        Ok(safe_render(
            template.body(),
            props,
            template.allowed_placeholders(),
            template.props_schema(),
        ))
    }

    /// Verifies an invocation and audits the verdict.
    #[must_use]
    pub fn verify(&self, invocation: &Invocation, trace_id: &str) -> Verdict {
        let verdict = self.verifier.verify(invocation, trace_id);
        let event = AuditEvent::Verify {
            trace_id: trace_id.to_owned(),
            approved: verdict.approved(),
            reason: verdict.reason().to_owned(),
        };
        if let Err(error) = self.audit.record(invocation.tool_id(), &event) {
            warn!(target: HOST_TARGET, tool = invocation.tool_id(), %error, "verify audit skipped");
        }
        verdict
    }

    /// Executes a registered plugin.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::execute`].
    pub fn execute(&self, request: &ExecuteRequest) -> Result<ExecutionResult, PluginError> {
        self.dispatcher.execute(request)
    }

    /// Cancels a running session; returns false when it is not active.
    pub fn cancel(&self, session_id: &str) -> bool {
        self.dispatcher.sessions().cancel(session_id)
    }

    /// Returns the session tracker.
    #[must_use]
    pub const fn sessions(&self) -> &SessionTracker {
        self.dispatcher.sessions()
    }

    /// Returns the audit log.
    #[must_use]
    pub const fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Returns the registry.
    #[must_use]
    pub const fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }
}
