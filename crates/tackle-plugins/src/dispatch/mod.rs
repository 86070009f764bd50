//! Execution dispatch across the four plugin backends.
//!
//! The [`Dispatcher`] resolves a registered contract, chooses a backend from
//! its runtime (HTTP adapter, then container adapter, then the in-process
//! script sandbox for trusted `nodejs` handlers, then the direct
//! interpreter), applies the permission gate, and runs the plugin inside a
//! tracked session.
//!
//! Audit records for one session are strictly ordered: `execute_request`,
//! then the backend's own events, then `execute_complete`. Backend faults
//! never escape as errors; they become an [`ExecutionResult`] with status
//! `error` and the message in `stderr`. Only lookup, validation, permission,
//! and admission failures are returned as [`PluginError`].

mod container;
mod http;
mod interpreter;
pub(crate) mod permissions;
mod result;
mod script;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use tackle_sandbox::{QuickJsSandbox, ScriptSandbox};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditLog, CancelFlag, SessionTracker};
use crate::contract::{Adapter, PluginContract, RuntimeKind, RuntimeSpec};
use crate::error::PluginError;
use crate::manifest::validate_against;
use crate::registry::ArtifactRegistry;

use self::container::ContainerBackend;
use self::http::HttpBackend;
use self::interpreter::InterpreterBackend;
use self::script::ScriptBackend;

pub use self::result::{
    BackendKind, ExecutionFailure, ExecutionResult, ExecutionStatus, FailureKind,
    INTERNAL_EXIT_CODE, KILLED_EXIT_CODE,
};

pub(crate) const DISPATCH_TARGET: &str = "tackle_plugins::dispatch";

static SESSION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Chooses the backend for `runtime`.
///
/// # Example
///
/// ```
/// use tackle_plugins::dispatch::{BackendKind, select_backend};
/// use tackle_plugins::{RuntimeKind, RuntimeSpec};
///
/// let runtime = RuntimeSpec::new(RuntimeKind::Python, "main.py");
/// assert_eq!(select_backend(&runtime), BackendKind::Interpreter);
/// ```
#[must_use]
pub fn select_backend(runtime: &RuntimeSpec) -> BackendKind {
    match runtime.adapter() {
        Some(Adapter::Http { .. }) => BackendKind::Http,
        Some(Adapter::Docker { .. }) => BackendKind::Container,
        None if runtime.is_in_process() && runtime.kind() == RuntimeKind::Nodejs => {
            BackendKind::Script
        }
        None => BackendKind::Interpreter,
    }
}

/// Tunables for the built-in backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Program used for `nodejs` entrypoints.
    pub nodejs_interpreter: String,
    /// Program used for `python` entrypoints.
    pub python_interpreter: String,
    /// Container runtime CLI.
    pub container_program: String,
    /// Default wall-clock limit for interpreter runs.
    pub interpreter_timeout: Duration,
    /// Default wall-clock limit for container runs.
    pub container_timeout: Duration,
    /// Client timeout for HTTP adapters.
    pub http_timeout: Duration,
    /// Budget for in-process handlers.
    pub script_budget: Duration,
    /// Maximum concurrent sessions per plugin.
    pub max_concurrent_per_plugin: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            nodejs_interpreter: String::from("node"),
            python_interpreter: String::from("python3"),
            container_program: String::from("docker"),
            interpreter_timeout: Duration::from_secs(30),
            container_timeout: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
            script_budget: Duration::from_millis(1000),
            max_concurrent_per_plugin: 8,
        }
    }
}

/// Everything a backend needs to run one plugin invocation.
pub struct ExecutionContext<'a> {
    contract: &'a PluginContract,
    repo_path: &'a Path,
    input: &'a Value,
    session_id: &'a str,
    caller: &'a str,
    cancel: &'a CancelFlag,
    audit: &'a AuditLog,
}

impl ExecutionContext<'_> {
    /// Returns the contract being executed.
    #[must_use]
    pub const fn contract(&self) -> &PluginContract {
        self.contract
    }

    /// Returns the plugin repository.
    #[must_use]
    pub const fn repo_path(&self) -> &Path {
        self.repo_path
    }

    /// Returns the input document.
    #[must_use]
    pub const fn input(&self) -> &Value {
        self.input
    }

    /// Returns the session identifier.
    #[must_use]
    pub const fn session_id(&self) -> &str {
        self.session_id
    }

    /// Returns the caller identifier.
    #[must_use]
    pub const fn caller(&self) -> &str {
        self.caller
    }

    /// Returns the session's cancellation flag.
    #[must_use]
    pub const fn cancel(&self) -> &CancelFlag {
        self.cancel
    }

    /// Returns the runtime's timeout override or `default`.
    #[must_use]
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.contract
            .runtime()
            .timeout_secs()
            .map_or(default, Duration::from_secs)
    }

    /// Appends a backend event to the plugin's audit log.
    pub fn record(&self, event: &AuditEvent) {
        if let Err(error) = self.audit.record(self.contract.id(), event) {
            warn!(
                target: DISPATCH_TARGET,
                plugin = self.contract.id(),
                session_id = self.session_id,
                %error,
                "failed to append audit record"
            );
        }
    }
}

/// One execution backend.
///
/// Each [`BackendKind`] has exactly one implementation installed in a
/// [`Dispatcher`]; [`Dispatcher::with_backend`] replaces it.
pub trait Backend: Send + Sync {
    /// Returns the variant this backend implements.
    fn kind(&self) -> BackendKind;

    /// Describes what will be run, for the `exec_start` audit record.
    fn describe(&self, context: &ExecutionContext<'_>) -> Option<String>;

    /// Runs the plugin.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionFailure`] when no normal result could be
    /// produced; the dispatcher converts it into an error result.
    fn execute(&self, context: &ExecutionContext<'_>) -> Result<ExecutionResult, ExecutionFailure>;
}

/// A request to execute a registered plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    plugin_id: String,
    version: Option<String>,
    input: Value,
    session_id: Option<String>,
    caller: Option<String>,
}

impl ExecuteRequest {
    /// Creates a request for the latest version of `plugin_id`.
    #[must_use]
    pub fn new(plugin_id: impl Into<String>, input: Value) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            version: None,
            input,
            session_id: None,
            caller: None,
        }
    }

    /// Pins the plugin version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Uses a caller-chosen session identifier.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Records the caller passed to in-process handlers.
    #[must_use]
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// Returns the plugin identifier.
    #[must_use]
    pub const fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Returns the pinned version, if any.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Returns the input document.
    #[must_use]
    pub const fn input(&self) -> &Value {
        &self.input
    }
}

/// Routes executions to backends inside tracked, audited sessions.
pub struct Dispatcher {
    registry: ArtifactRegistry,
    audit: AuditLog,
    sessions: SessionTracker,
    script: Arc<dyn Backend>,
    interpreter: Arc<dyn Backend>,
    container: Arc<dyn Backend>,
    http: Arc<dyn Backend>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("audit", &self.audit)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with the built-in backends.
    #[must_use]
    pub fn new(registry: ArtifactRegistry, audit: AuditLog, settings: &DispatchSettings) -> Self {
        let sandbox: Arc<dyn ScriptSandbox> = Arc::new(QuickJsSandbox);
        Self {
            registry,
            audit,
            sessions: SessionTracker::new(settings.max_concurrent_per_plugin),
            script: Arc::new(ScriptBackend::new(sandbox, settings.script_budget)),
            interpreter: Arc::new(InterpreterBackend::new(
                settings.nodejs_interpreter.as_str(),
                settings.python_interpreter.as_str(),
                settings.interpreter_timeout,
            )),
            container: Arc::new(ContainerBackend::new(
                settings.container_program.as_str(),
                settings.container_timeout,
            )),
            http: Arc::new(HttpBackend::new(settings.http_timeout)),
        }
    }

    /// Replaces the backend for `backend.kind()`.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        match backend.kind() {
            BackendKind::Script => self.script = backend,
            BackendKind::Interpreter => self.interpreter = backend,
            BackendKind::Container => self.container = backend,
            BackendKind::Http => self.http = backend,
        }
        self
    }

    /// Returns the session tracker, e.g. to cancel a running session.
    #[must_use]
    pub const fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Returns the audit log.
    #[must_use]
    pub const fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn backend(&self, kind: BackendKind) -> &dyn Backend {
        match kind {
            BackendKind::Script => self.script.as_ref(),
            BackendKind::Interpreter => self.interpreter.as_ref(),
            BackendKind::Container => self.container.as_ref(),
            BackendKind::Http => self.http.as_ref(),
        }
    }

    /// Executes a registered plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] for unknown plugins,
    /// [`PluginError::Validation`] when the input violates the contract's
    /// input schema, [`PluginError::PermissionDenied`] when the selected
    /// backend exceeds the declared permissions, [`PluginError::Busy`] when
    /// the plugin is at its concurrency limit, and [`PluginError::Io`] when
    /// the opening audit record cannot be written. Backend failures are
    /// reported inside the returned result instead.
    pub fn execute(&self, request: &ExecuteRequest) -> Result<ExecutionResult, PluginError> {
        let artifact = self.registry.get(request.plugin_id(), request.version())?;
        let contract = artifact.contract();
        validate_against(contract.io().input(), request.input(), "input")?;

        let kind = select_backend(contract.runtime());
        permissions::check(contract, kind)?;

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(generate_session_id);
        let guard = self.sessions.open(&session_id, contract.id())?;
        self.audit.record(
            contract.id(),
            &AuditEvent::execute_request(&session_id, request.input()),
        )?;

        let cancel = guard.cancel_flag().clone();
        let context = ExecutionContext {
            contract,
            repo_path: artifact.repo_path(),
            input: request.input(),
            session_id: &session_id,
            caller: request.caller.as_deref().unwrap_or("tackle"),
            cancel: &cancel,
            audit: &self.audit,
        };
        let result = self.run_backend(kind, &context);

        drop(guard);
        context.record(&AuditEvent::ExecuteComplete {
            session_id: session_id.clone(),
        });
        Ok(result)
    }

    fn run_backend(&self, kind: BackendKind, context: &ExecutionContext<'_>) -> ExecutionResult {
        let backend = self.backend(kind);
        let session_id = context.session_id();
        context.record(&AuditEvent::ExecStart {
            session_id: session_id.to_owned(),
            backend: kind.as_str().to_owned(),
            cmd: backend.describe(context),
        });
        debug!(
            target: DISPATCH_TARGET,
            plugin = context.contract().id(),
            session_id,
            backend = kind.as_str(),
            "dispatching plugin"
        );

        let started_at = OffsetDateTime::now_utc();
        let clock = Instant::now();
        let outcome = backend.execute(context);
        let finished_at = OffsetDateTime::now_utc();

        let result = match outcome {
            Ok(result) => {
                context.record(&AuditEvent::ExecFinish {
                    session_id: session_id.to_owned(),
                    status: result.status().as_str().to_owned(),
                    code: result.exit_code(),
                });
                result
            }
            Err(failure) => {
                context.record(&AuditEvent::ExecError {
                    session_id: session_id.to_owned(),
                    error: failure.to_string(),
                });
                failure.into_result(kind)
            }
        };
        info!(
            target: DISPATCH_TARGET,
            plugin = context.contract().id(),
            session_id,
            backend = kind.as_str(),
            status = result.status().as_str(),
            exit_code = result.exit_code(),
            elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            "plugin execution finished"
        );
        result.stamped(session_id, started_at, finished_at)
    }
}

/// Generates `s-<unix millis>-<sequence>`.
fn generate_session_id() -> String {
    let millis = (OffsetDateTime::now_utc() - OffsetDateTime::UNIX_EPOCH).whole_milliseconds();
    let sequence = SESSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("s-{millis}-{sequence}")
}
