//! Domain errors raised by pipeline operations.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. I/O errors are wrapped in `Arc`
//! to satisfy the `result_large_err` Clippy lint.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::template::TemplateError;

/// Errors arising from plugin pipeline operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Input failed validation. Every violation is reported.
    #[error("validation failed: {}", .violations.join("; "))]
    Validation {
        /// Individual violation descriptions.
        violations: Vec<String>,
    },

    /// The requested plugin was not found in the registry.
    #[error("plugin '{}' not found in registry", qualified(.id, .version.as_deref()))]
    NotFound {
        /// Plugin identifier that was looked up.
        id: String,
        /// Requested version, if any.
        version: Option<String>,
    },

    /// A backend operation would exceed a declared permission.
    #[error(
        "plugin '{plugin}' lacks the '{permission}' permission required by the {backend} backend"
    )]
    PermissionDenied {
        /// Plugin identifier.
        plugin: String,
        /// Permission that was missing.
        permission: String,
        /// Backend that demanded it.
        backend: String,
    },

    /// The per-plugin concurrency limit is exhausted.
    #[error("plugin '{plugin}' already has {limit} executions in flight")]
    Busy {
        /// Plugin identifier.
        plugin: String,
        /// Configured limit.
        limit: usize,
    },

    /// The operation did not complete within its timeout.
    #[error("plugin '{plugin}' timed out after {timeout_secs}s")]
    Timeout {
        /// Plugin identifier.
        plugin: String,
        /// Configured timeout in seconds.
        timeout_secs: u64,
    },

    /// A backend ran but failed; captured output is retained.
    #[error("plugin '{plugin}' failed: {message}")]
    BackendExecution {
        /// Plugin identifier.
        plugin: String,
        /// Human-readable failure description.
        message: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// A manifest signature was missing, malformed, or did not verify.
    #[error("signature rejected: {message}")]
    Signature {
        /// Description of the signature failure.
        message: String,
    },

    /// Template rendering failed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A registry artifact could not be encoded or decoded.
    #[error("registry artifact {path} is unusable: {message}")]
    Registry {
        /// Artifact file path.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON processing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl PluginError {
    /// Builds an I/O error for `path`.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Builds a single-violation validation error.
    pub(crate) fn invalid(violation: impl Into<String>) -> Self {
        Self::Validation {
            violations: vec![violation.into()],
        }
    }

    /// Maps the error onto the HTTP status a front end should report.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::Signature { .. } | Self::Template(_) => 400,
            Self::PermissionDenied { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Busy { .. } => 429,
            Self::Timeout { .. }
            | Self::BackendExecution { .. }
            | Self::Registry { .. }
            | Self::Json(_)
            | Self::Io { .. } => 500,
        }
    }
}

fn qualified(id: &str, version: Option<&str>) -> String {
    version.map_or_else(|| id.to_owned(), |v| format!("{id}@{v}"))
}
