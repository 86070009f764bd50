//! Plugin execution pipeline for Tackle.
//!
//! The `tackle-plugins` crate lets third parties register executable plugins
//! through a `plugin.yaml` manifest and have the host invoke them uniformly,
//! whether they run as an in-process script, a local subprocess, a container,
//! or a remote HTTP service.
//!
//! # Architecture
//!
//! Data flows through five components:
//!
//! - The [`ManifestNormalizer`] validates a manifest, checks its optional
//!   Ed25519 signature, and produces a sealed [`PluginContract`].
//! - The [`ArtifactRegistry`] stores contracts as content-hashed
//!   `id@version.json` artifacts with atomic writes.
//! - The [`verifier::Verifier`] checks an [`Invocation`] against the
//!   registered contract before anything runs.
//! - The [`template`] renderer fills `${{NAME}}` placeholders with
//!   JSON-escaped values to build invocation bodies.
//! - The [`dispatch::Dispatcher`] runs the plugin on the right backend under
//!   a timeout, inside a tracked session, with an append-only
//!   [`audit::AuditLog`].
//!
//! [`host::PluginHost`] wires them together.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use serde_json::json;
//! use tackle_plugins::dispatch::ExecuteRequest;
//! use tackle_plugins::host::{HostSettings, PluginHost};
//!
//! # fn main() -> Result<(), tackle_plugins::PluginError> {
//! let host = PluginHost::open(&HostSettings::new("core-registry", "tool-list.json"))?;
//! host.register(Path::new("plugins/echo"))?;
//! let result = host.execute(&ExecuteRequest::new("echo", json!({ "text": "hi" })))?;
//! println!("{}", serde_json::to_string(&result)?);
//! # Ok(()) }
//! ```

pub mod audit;
pub mod builder;
pub mod canonical;
pub mod contract;
pub mod discovery;
pub mod dispatch;
pub mod error;
mod files;
pub mod host;
pub mod invocation;
pub mod manifest;
mod process;
pub mod registry;
pub mod template;
pub mod verifier;

#[cfg(test)]
mod tests;

pub use self::contract::{
    Adapter, FilesystemAccess, IoContract, Permissions, PluginContract, PluginInfo, RuntimeKind,
    RuntimeSpec, TemplateSpec,
};
pub use self::error::PluginError;
pub use self::invocation::Invocation;
pub use self::manifest::{ManifestNormalizer, NormalizedManifest, SignaturePolicy};
pub use self::registry::{ArtifactRegistry, RegistryArtifact};
