//! Shared configuration for the Tackle plugin host.
//!
//! [`Config`] is loaded through `ortho_config`, layering built-in defaults,
//! an optional configuration file, `TACKLE_*` environment variables, and
//! command-line flags, in increasing order of precedence. The plugin library
//! never reads this type; the binary converts it into host settings.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;

pub use defaults::{
    DEFAULT_BUILD_TIMEOUT_SECS, DEFAULT_CONTAINER_PROGRAM, DEFAULT_CONTAINER_TIMEOUT_SECS,
    DEFAULT_DISCOVERY_PATH, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_INTERPRETER_TIMEOUT_SECS,
    DEFAULT_LOG_FILTER, DEFAULT_MAX_CONCURRENT_PER_PLUGIN, DEFAULT_NODEJS_INTERPRETER,
    DEFAULT_PYTHON_INTERPRETER, DEFAULT_REGISTRY_DIR, DEFAULT_SCRIPT_BUDGET_MS, DEFAULT_SHELL,
    default_discovery_path, default_log_filter, default_log_filter_string, default_log_format,
    default_registry_dir,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Layered configuration for the `tackle` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[serde(default)]
#[ortho_config(prefix = "TACKLE")]
pub struct Config {
    /// Directory holding artifacts, audit logs, and build logs.
    #[ortho_config(default = default_registry_dir())]
    pub registry_dir: Utf8PathBuf,
    /// Path of the discovery projection written after registration.
    #[ortho_config(default = default_discovery_path())]
    pub discovery_path: Utf8PathBuf,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Reject manifests that carry no valid signature.
    #[ortho_config(default = false)]
    pub require_signatures: bool,
    /// Base64 Ed25519 public keys accepted as manifest signers.
    #[ortho_config(default = Vec::new(), merge_strategy = "append")]
    pub trusted_signers: Vec<String>,
    /// Run the declared build command when a plugin is registered.
    #[ortho_config(default = true)]
    pub auto_build: bool,
    /// Program used for `nodejs` entrypoints.
    #[ortho_config(default = String::from(DEFAULT_NODEJS_INTERPRETER))]
    pub nodejs_interpreter: String,
    /// Program used for `python` entrypoints.
    #[ortho_config(default = String::from(DEFAULT_PYTHON_INTERPRETER))]
    pub python_interpreter: String,
    /// Container runtime CLI.
    #[ortho_config(default = String::from(DEFAULT_CONTAINER_PROGRAM))]
    pub container_program: String,
    /// Shell used to run build commands.
    #[ortho_config(default = String::from(DEFAULT_SHELL))]
    pub shell: String,
    /// Default wall-clock limit for interpreter runs, in seconds.
    #[ortho_config(default = DEFAULT_INTERPRETER_TIMEOUT_SECS)]
    pub interpreter_timeout_secs: u64,
    /// Default wall-clock limit for container runs, in seconds.
    #[ortho_config(default = DEFAULT_CONTAINER_TIMEOUT_SECS)]
    pub container_timeout_secs: u64,
    /// Client timeout for HTTP adapters, in seconds.
    #[ortho_config(default = DEFAULT_HTTP_TIMEOUT_SECS)]
    pub http_timeout_secs: u64,
    /// Budget for in-process script handlers, in milliseconds.
    #[ortho_config(default = DEFAULT_SCRIPT_BUDGET_MS)]
    pub script_budget_ms: u64,
    /// Wall-clock limit for build commands, in seconds.
    #[ortho_config(default = DEFAULT_BUILD_TIMEOUT_SECS)]
    pub build_timeout_secs: u64,
    /// Concurrent sessions admitted per plugin.
    #[ortho_config(default = DEFAULT_MAX_CONCURRENT_PER_PLUGIN)]
    pub max_concurrent_per_plugin: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_dir: default_registry_dir(),
            discovery_path: default_discovery_path(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            require_signatures: false,
            trusted_signers: Vec::new(),
            auto_build: true,
            nodejs_interpreter: String::from(DEFAULT_NODEJS_INTERPRETER),
            python_interpreter: String::from(DEFAULT_PYTHON_INTERPRETER),
            container_program: String::from(DEFAULT_CONTAINER_PROGRAM),
            shell: String::from(DEFAULT_SHELL),
            interpreter_timeout_secs: DEFAULT_INTERPRETER_TIMEOUT_SECS,
            container_timeout_secs: DEFAULT_CONTAINER_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            script_budget_ms: DEFAULT_SCRIPT_BUDGET_MS,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            max_concurrent_per_plugin: DEFAULT_MAX_CONCURRENT_PER_PLUGIN,
        }
    }
}

impl Config {
    /// Registry directory.
    #[must_use]
    pub fn registry_dir(&self) -> &Utf8Path {
        self.registry_dir.as_path()
    }

    /// Discovery projection path.
    #[must_use]
    pub fn discovery_path(&self) -> &Utf8Path {
        self.discovery_path.as_path()
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Interpreter timeout as a [`Duration`].
    #[must_use]
    pub const fn interpreter_timeout(&self) -> Duration {
        Duration::from_secs(self.interpreter_timeout_secs)
    }

    /// Container timeout as a [`Duration`].
    #[must_use]
    pub const fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout_secs)
    }

    /// HTTP client timeout as a [`Duration`].
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Script budget as a [`Duration`].
    #[must_use]
    pub const fn script_budget(&self) -> Duration {
        Duration::from_millis(self.script_budget_ms)
    }

    /// Build timeout as a [`Duration`].
    #[must_use]
    pub const fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.registry_dir(), Utf8Path::new("core-registry"));
        assert_eq!(config.discovery_path(), Utf8Path::new("tool-list.json"));
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Json);
        assert!(config.auto_build);
        assert!(!config.require_signatures);
        assert_eq!(config.interpreter_timeout(), Duration::from_secs(30));
        assert_eq!(config.container_timeout(), Duration::from_secs(60));
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.script_budget(), Duration::from_millis(1000));
        assert_eq!(config.build_timeout(), Duration::from_secs(300));
        assert_eq!(config.max_concurrent_per_plugin, 8);
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config: Config = serde_json::from_str(r#"{"shell":"bash","log_format":"compact"}"#)
            .expect("partial config deserialises");
        assert_eq!(config.shell, "bash");
        assert_eq!(config.log_format(), LogFormat::Compact);
        assert_eq!(config.python_interpreter, DEFAULT_PYTHON_INTERPRETER);
    }
}
