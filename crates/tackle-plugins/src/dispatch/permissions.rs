//! Permission gate and sandbox profile derivation.

use tackle_sandbox::{FilesystemPolicy, SandboxProfile};

use super::BackendKind;
use crate::contract::{FilesystemAccess, Permissions, PluginContract};
use crate::error::PluginError;

/// Refuses backends whose operation exceeds the declared permissions.
///
/// The HTTP adapter needs `network`. Containers bind-mount the plugin
/// repository, so they need filesystem access. A direct interpreter process
/// runs with the host's network and filesystem, which it cannot confine, so
/// it needs `network` and `filesystem: write`.
pub(crate) fn check(contract: &PluginContract, backend: BackendKind) -> Result<(), PluginError> {
    match missing_permission(contract.permissions(), backend) {
        Some(permission) => Err(PluginError::PermissionDenied {
            plugin: contract.key(),
            permission: permission.to_owned(),
            backend: backend.as_str().to_owned(),
        }),
        None => Ok(()),
    }
}

fn missing_permission(permissions: &Permissions, backend: BackendKind) -> Option<&'static str> {
    match backend {
        BackendKind::Http if !permissions.network() => Some("network"),
        BackendKind::Container if permissions.filesystem() == FilesystemAccess::None => {
            Some("filesystem")
        }
        BackendKind::Interpreter if !permissions.network() => Some("network"),
        BackendKind::Interpreter if permissions.filesystem() != FilesystemAccess::Write => {
            Some("filesystem")
        }
        _ => None,
    }
}

/// Maps declared permissions onto a process confinement profile.
pub(crate) fn profile_for(permissions: &Permissions) -> SandboxProfile {
    let filesystem = match permissions.filesystem() {
        FilesystemAccess::Read => FilesystemPolicy::ReadOnly,
        FilesystemAccess::Write => FilesystemPolicy::ReadWrite,
        FilesystemAccess::None => FilesystemPolicy::None,
    };
    let base = SandboxProfile::new().with_filesystem(filesystem);
    let with_network = if permissions.network() {
        base.allow_networking()
    } else {
        base
    };
    if permissions.env() {
        with_network.allow_full_environment()
    } else {
        with_network
    }
}
