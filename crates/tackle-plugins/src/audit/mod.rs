//! Append-only audit trail and in-flight session tracking.
//!
//! Every lifecycle event (registration, build, verification, execution) is
//! appended to a per-plugin log as one `<RFC 3339 timestamp> <JSON>` line.
//! Lines are never rewritten or removed. Appends are synchronous and complete
//! before the triggering operation returns.

mod session;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::trace;

use crate::error::PluginError;

pub use self::session::{CancelFlag, Session, SessionGuard, SessionTracker};

const AUDIT_TARGET: &str = "tackle_plugins::audit";

/// Suffix of per-plugin audit files.
const AUDIT_SUFFIX: &str = ".audit.log";

/// Maximum number of input characters recorded in `execute_request`.
pub const INPUT_SUMMARY_CHARS: usize = 1024;

/// A lifecycle event recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AuditEvent {
    /// A contract was registered.
    Register {
        /// Plugin repository path.
        repo_path: String,
        /// Content hash of the stored artifact.
        artifact_hash: String,
    },
    /// A build started.
    BuildStart {
        /// Build command.
        cmd: String,
        /// Plugin repository path.
        repo_path: String,
    },
    /// A build finished.
    BuildFinish {
        /// Whether the build succeeded.
        success: bool,
        /// Failure description.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Registration triggered a build automatically.
    BuildAutoTriggered {
        /// `ok` or `error`.
        status: String,
        /// Failure description.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// An invocation was verified.
    Verify {
        /// Caller-supplied trace identifier.
        trace_id: String,
        /// Whether the invocation was approved.
        approved: bool,
        /// Verdict explanation.
        reason: String,
    },
    /// An execution was requested.
    ExecuteRequest {
        /// Session identifier.
        session_id: String,
        /// Leading characters of the serialised input.
        input_summary: String,
    },
    /// A backend started work.
    ExecStart {
        /// Session identifier.
        session_id: String,
        /// Backend name.
        backend: String,
        /// Command line or target, when meaningful.
        #[serde(skip_serializing_if = "Option::is_none")]
        cmd: Option<String>,
    },
    /// A backend finished.
    ExecFinish {
        /// Session identifier.
        session_id: String,
        /// `ok` or `error`.
        status: String,
        /// Exit code or HTTP status.
        code: i32,
    },
    /// A backend failed before producing a result.
    ExecError {
        /// Session identifier.
        session_id: String,
        /// Failure description.
        error: String,
    },
    /// The HTTP adapter received a response.
    ExecuteAdapterHttp {
        /// Session identifier.
        session_id: String,
        /// Request URL.
        url: String,
        /// HTTP status.
        status: u16,
    },
    /// An execution completed, successfully or not.
    ExecuteComplete {
        /// Session identifier.
        session_id: String,
    },
}

impl AuditEvent {
    /// Builds an `execute_request` event, truncating the input summary.
    #[must_use]
    pub fn execute_request(session_id: &str, input: &Value) -> Self {
        let summary: String = input.to_string().chars().take(INPUT_SUMMARY_CHARS).collect();
        Self::ExecuteRequest {
            session_id: session_id.to_owned(),
            input_summary: summary,
        }
    }
}

/// One parsed audit line.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Event payload including the `event` tag.
    pub record: Value,
}

impl AuditEntry {
    /// Returns the event name.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.record.get("event").and_then(Value::as_str)
    }
}

/// Per-plugin append-only audit log directory.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl AuditLog {
    /// Creates a log writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the audit file for `plugin_id`.
    #[must_use]
    pub fn path_for(&self, plugin_id: &str) -> PathBuf {
        self.dir.join(format!("{plugin_id}{AUDIT_SUFFIX}"))
    }

    /// Appends `event` to the log of `plugin_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Validation`] if the id cannot name a file and
    /// [`PluginError::Io`] if the append fails.
    pub fn record(&self, plugin_id: &str, event: &AuditEvent) -> Result<(), PluginError> {
        if plugin_id.is_empty() || plugin_id.contains(['/', '\\']) || plugin_id.starts_with('.') {
            return Err(PluginError::invalid(format!(
                "plugin id '{plugin_id}' cannot name an audit log"
            )));
        }
        let line = format!(
            "{} {}\n",
            timestamp(OffsetDateTime::now_utc()),
            serde_json::to_string(event)?
        );
        let path = self.path_for(plugin_id);

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        fs::create_dir_all(&self.dir).map_err(|error| PluginError::io(&self.dir, error))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|error| PluginError::io(&path, error))?;
        file.write_all(line.as_bytes())
            .map_err(|error| PluginError::io(&path, error))?;
        trace!(target: AUDIT_TARGET, plugin = plugin_id, line = line.trim_end(), "audit appended");
        Ok(())
    }

    /// Reads back every entry recorded for `plugin_id`.
    ///
    /// Lines that do not parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the log exists but cannot be read.
    pub fn read(&self, plugin_id: &str) -> Result<Vec<AuditEntry>, PluginError> {
        let path = self.path_for(plugin_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path).map_err(|error| PluginError::io(&path, error))?;
        Ok(text.lines().filter_map(parse_line).collect())
    }

    /// Returns the log directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn parse_line(line: &str) -> Option<AuditEntry> {
    let (stamp, payload) = line.split_once(' ')?;
    let record = serde_json::from_str(payload).ok()?;
    Some(AuditEntry {
        timestamp: stamp.to_owned(),
        record,
    })
}

/// Formats `at` as RFC 3339, falling back to Unix seconds.
pub(crate) fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
