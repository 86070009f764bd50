//! Process confinement policy and builder helpers.

use std::collections::BTreeSet;
use std::env;
use std::path::Path;
use std::process::Command;

/// Environment variable every profile inherits unless isolation is explicit.
const PATH_VARIABLE: &str = "PATH";

/// Environment inheritance strategy applied to plugin processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentPolicy {
    /// Remove all environment variables before launching the child.
    Isolated,
    /// Allow only the named environment variables to be inherited.
    AllowList(BTreeSet<String>),
    /// Inherit the full environment unchanged.
    InheritAll,
}

impl Default for EnvironmentPolicy {
    fn default() -> Self {
        Self::AllowList(BTreeSet::from([String::from(PATH_VARIABLE)]))
    }
}

/// Network access policy applied to plugin processes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum NetworkPolicy {
    /// Run without network access.
    #[default]
    Deny,
    /// Permit networking.
    Allow,
}

/// Filesystem exposure granted to a plugin process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FilesystemPolicy {
    /// The plugin directory is not exposed.
    #[default]
    None,
    /// The plugin directory is exposed read-only.
    ReadOnly,
    /// The plugin directory is exposed read-write.
    ReadWrite,
}

/// Declarative description of what a plugin process may inherit.
///
/// The profile defaults to a restrictive configuration: networking is denied,
/// the filesystem is not exposed, and only `PATH` is inherited so that
/// interpreters remain resolvable.
///
/// ```
/// use tackle_sandbox::{FilesystemPolicy, SandboxProfile};
///
/// let profile = SandboxProfile::new()
///     .with_filesystem(FilesystemPolicy::ReadOnly)
///     .allow_environment_variable("LANG");
/// assert!(profile.network_policy().is_denied());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxProfile {
    environment: EnvironmentPolicy,
    network: NetworkPolicy,
    filesystem: FilesystemPolicy,
}

impl SandboxProfile {
    /// Creates the default restrictive profile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whitelists an environment variable for inheritance.
    ///
    /// When the policy is already [`EnvironmentPolicy::InheritAll`] this is a
    /// no-op because the full environment is already permitted.
    #[must_use]
    pub fn allow_environment_variable(mut self, key: impl Into<String>) -> Self {
        self.environment = self.environment.with_allowed(key.into());
        self
    }

    /// Inherit all environment variables from the parent process.
    #[must_use]
    pub fn allow_full_environment(mut self) -> Self {
        self.environment = EnvironmentPolicy::InheritAll;
        self
    }

    /// Strips every environment variable, including `PATH`.
    #[must_use]
    pub fn isolate_environment(mut self) -> Self {
        self.environment = EnvironmentPolicy::Isolated;
        self
    }

    /// Allows the plugin process to use the host network.
    #[must_use]
    pub const fn allow_networking(mut self) -> Self {
        self.network = NetworkPolicy::Allow;
        self
    }

    /// Sets the filesystem exposure.
    #[must_use]
    pub const fn with_filesystem(mut self, filesystem: FilesystemPolicy) -> Self {
        self.filesystem = filesystem;
        self
    }

    /// Returns the configured environment policy.
    #[must_use]
    pub const fn environment_policy(&self) -> &EnvironmentPolicy {
        &self.environment
    }

    /// Returns the network policy.
    #[must_use]
    pub const fn network_policy(&self) -> NetworkPolicy {
        self.network
    }

    /// Returns the filesystem policy.
    #[must_use]
    pub const fn filesystem_policy(&self) -> FilesystemPolicy {
        self.filesystem
    }

    /// Applies the environment policy to a process builder.
    ///
    /// Allow-listed variables are copied from the current process; variables
    /// absent from the host environment are skipped.
    pub fn apply_environment(&self, command: &mut Command) {
        match &self.environment {
            EnvironmentPolicy::InheritAll => {}
            EnvironmentPolicy::Isolated => {
                command.env_clear();
            }
            EnvironmentPolicy::AllowList(keys) => {
                command.env_clear();
                for key in keys {
                    if let Some(value) = env::var_os(key) {
                        command.env(key, value);
                    }
                }
            }
        }
    }

    /// Renders the profile as container runtime arguments.
    ///
    /// The host directory is bind-mounted at `mount_point` with a mode derived
    /// from the filesystem policy, and networking is disabled unless allowed.
    #[must_use]
    pub fn container_args(&self, host_dir: &Path, mount_point: &str) -> Vec<String> {
        let mut args = Vec::new();
        if self.network.is_denied() {
            args.push(String::from("--network"));
            args.push(String::from("none"));
        }

        let mode = match self.filesystem {
            FilesystemPolicy::ReadWrite => "rw",
            FilesystemPolicy::ReadOnly | FilesystemPolicy::None => "ro",
        };
        args.push(String::from("-v"));
        args.push(format!("{}:{mount_point}:{mode}", host_dir.display()));

        match &self.environment {
            EnvironmentPolicy::Isolated => {}
            EnvironmentPolicy::AllowList(keys) => {
                for key in keys.iter().filter(|key| key.as_str() != PATH_VARIABLE) {
                    args.push(String::from("-e"));
                    args.push(key.clone());
                }
            }
            EnvironmentPolicy::InheritAll => {
                for (key, _) in env::vars_os() {
                    if let Some(name) = key.to_str() {
                        args.push(String::from("-e"));
                        args.push(name.to_owned());
                    }
                }
            }
        }
        args
    }
}

impl NetworkPolicy {
    /// Returns true when networking is denied.
    #[must_use]
    pub const fn is_denied(self) -> bool {
        matches!(self, Self::Deny)
    }
}

impl EnvironmentPolicy {
    pub(crate) fn with_allowed(self, key: String) -> Self {
        match self {
            Self::Isolated => Self::AllowList(BTreeSet::from([key])),
            Self::AllowList(mut keys) => {
                let _ = keys.insert(key);
                Self::AllowList(keys)
            }
            Self::InheritAll => Self::InheritAll,
        }
    }
}
