//! Execution results and backend failures.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tackle_sandbox::SandboxError;
use thiserror::Error;
use time::OffsetDateTime;

/// Exit code reported when a process was killed or never produced one.
pub const KILLED_EXIT_CODE: i32 = -1;

/// Exit code reported for failures that happen outside the plugin.
pub const INTERNAL_EXIT_CODE: i32 = 1;

/// Backend selected for an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process QuickJS sandbox.
    Script,
    /// Direct interpreter or binary child process.
    Interpreter,
    /// Container run through the configured container program.
    Container,
    /// Remote HTTP adapter.
    Http,
}

impl BackendKind {
    /// Returns the backend name as used in audit records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Interpreter => "interpreter",
            Self::Container => "container",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an execution succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// The plugin completed successfully.
    Ok,
    /// The plugin or its backend failed.
    Error,
}

impl ExecutionStatus {
    /// Returns `ok` or `error`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Classification of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The plugin ran past its deadline and was stopped.
    Timeout,
    /// The session was cancelled.
    Cancelled,
    /// The plugin exited unsuccessfully or returned a non-2xx status.
    Exit,
    /// The backend could not be started or reached.
    Launch,
    /// The in-process handler raised or was malformed.
    Script,
}

/// Outcome of one plugin execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    status: ExecutionStatus,
    exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<FailureKind>,
    backend: BackendKind,
    #[serde(default)]
    session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    finished_at: OffsetDateTime,
}

impl ExecutionResult {
    /// Creates a result for `backend` with the given status and exit code.
    #[must_use]
    pub fn new(backend: BackendKind, status: ExecutionStatus, exit_code: i32) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            status,
            exit_code,
            stdout: None,
            stderr: None,
            output: None,
            failure: None,
            backend,
            session_id: String::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Builds a result from a process exit, parsing stdout as JSON when it
    /// holds a single document.
    #[must_use]
    pub fn from_exit(backend: BackendKind, exit_code: i32, stdout: String, stderr: String) -> Self {
        let status = if exit_code == 0 {
            ExecutionStatus::Ok
        } else {
            ExecutionStatus::Error
        };
        let output = serde_json::from_str(stdout.trim()).ok();
        let mut result = Self::new(backend, status, exit_code);
        result.output = output;
        result.stdout = Some(stdout);
        result.stderr = Some(stderr);
        if status == ExecutionStatus::Error {
            result.failure = Some(FailureKind::Exit);
        }
        result
    }

    /// Sets the structured output.
    #[must_use]
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Sets captured standard output.
    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    /// Sets captured standard error.
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }

    /// Sets the failure classification.
    #[must_use]
    pub const fn with_failure(mut self, failure: FailureKind) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Stamps the session and wall-clock bounds.
    #[must_use]
    pub(crate) fn stamped(
        mut self,
        session_id: &str,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
    ) -> Self {
        session_id.clone_into(&mut self.session_id);
        self.started_at = started_at;
        self.finished_at = finished_at;
        self
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Returns true when the execution succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }

    /// Returns the exit code (HTTP status for the HTTP backend).
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Returns captured standard output.
    #[must_use]
    pub fn stdout(&self) -> Option<&str> {
        self.stdout.as_deref()
    }

    /// Returns captured standard error or the failure message.
    #[must_use]
    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }

    /// Returns the parsed output.
    #[must_use]
    pub const fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// Returns the failure classification.
    #[must_use]
    pub const fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    /// Returns the backend that ran the plugin.
    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Returns the session identifier.
    #[must_use]
    pub const fn session_id(&self) -> &str {
        self.session_id.as_str()
    }

    /// Returns when execution started.
    #[must_use]
    pub const fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Returns when execution finished.
    #[must_use]
    pub const fn finished_at(&self) -> OffsetDateTime {
        self.finished_at
    }
}

/// A backend fault that prevented a normal result.
///
/// The dispatcher converts every failure into an error [`ExecutionResult`].
#[derive(Debug, Error)]
pub enum ExecutionFailure {
    /// The process or container could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The deadline passed and the work was stopped.
    #[error("timed out after {timeout_ms}ms")]
    Timeout {
        /// Effective timeout in milliseconds.
        timeout_ms: u64,
        /// Output captured before the kill.
        stdout: String,
        /// Error output captured before the kill.
        stderr: String,
    },

    /// The session was cancelled and the work was stopped.
    #[error("execution cancelled")]
    Cancelled,

    /// The HTTP request could not be completed.
    #[error("HTTP request to {url} failed: {message}")]
    Transport {
        /// Target URL.
        url: String,
        /// Client error description.
        message: String,
    },

    /// The in-process handler failed.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// A filesystem operation around the execution failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The contract cannot run on the selected backend.
    #[error("{0}")]
    Misconfigured(String),

    /// The input could not be encoded.
    #[error("failed to encode input: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ExecutionFailure {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Returns the failure classification.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } | Self::Sandbox(SandboxError::BudgetExceeded { .. }) => {
                FailureKind::Timeout
            }
            Self::Cancelled => FailureKind::Cancelled,
            Self::Sandbox(_) => FailureKind::Script,
            Self::Spawn { .. }
            | Self::Transport { .. }
            | Self::Misconfigured(_)
            | Self::Io { .. }
            | Self::Encode(_) => {
                FailureKind::Launch
            }
        }
    }

    /// Converts the failure into an error result carrying the message in
    /// `stderr`.
    #[must_use]
    pub fn into_result(self, backend: BackendKind) -> ExecutionResult {
        let kind = self.kind();
        let exit_code = match kind {
            FailureKind::Timeout | FailureKind::Cancelled => KILLED_EXIT_CODE,
            FailureKind::Exit | FailureKind::Launch | FailureKind::Script => INTERNAL_EXIT_CODE,
        };
        let message = self.to_string();
        let result =
            ExecutionResult::new(backend, ExecutionStatus::Error, exit_code).with_failure(kind);
        match self {
            Self::Timeout { stdout, stderr, .. } => {
                let combined = if stderr.is_empty() {
                    message
                } else {
                    format!("{stderr}\n{message}")
                };
                result.with_stdout(stdout).with_stderr(combined)
            }
            _ => result.with_stderr(message),
        }
    }
}
