use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Directory holding registry artifacts, audit logs, and build logs.
pub const DEFAULT_REGISTRY_DIR: &str = "core-registry";

/// Location of the discovery projection.
pub const DEFAULT_DISCOVERY_PATH: &str = "tool-list.json";

/// Program used to run `nodejs` entrypoints.
pub const DEFAULT_NODEJS_INTERPRETER: &str = "node";

/// Program used to run `python` entrypoints.
pub const DEFAULT_PYTHON_INTERPRETER: &str = "python3";

/// Container runtime CLI.
pub const DEFAULT_CONTAINER_PROGRAM: &str = "docker";

/// Shell that runs build commands.
pub const DEFAULT_SHELL: &str = "sh";

/// Wall-clock limit for interpreter runs.
pub const DEFAULT_INTERPRETER_TIMEOUT_SECS: u64 = 30;

/// Wall-clock limit for container runs.
pub const DEFAULT_CONTAINER_TIMEOUT_SECS: u64 = 60;

/// Client timeout for HTTP adapters.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Budget for in-process script handlers.
pub const DEFAULT_SCRIPT_BUDGET_MS: u64 = 1000;

/// Wall-clock limit for build commands.
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 300;

/// Concurrent sessions admitted per plugin.
pub const DEFAULT_MAX_CONCURRENT_PER_PLUGIN: usize = 8;

/// Default log filter expression used by the binary.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    String::from(DEFAULT_LOG_FILTER)
}

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default registry directory, relative to the working directory.
#[must_use]
pub fn default_registry_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_REGISTRY_DIR)
}

/// Default discovery projection path, relative to the working directory.
#[must_use]
pub fn default_discovery_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_DISCOVERY_PATH)
}
