//! Isolation primitives for Tackle plugin execution.
//!
//! The `tackle-sandbox` crate provides the two isolation capabilities the
//! plugin dispatcher relies on:
//!
//! - A [`ScriptSandbox`] runs a trusted in-process handler inside an embedded
//!   QuickJS context. The only globals injected are `input`, `context`, and a
//!   `log` function; the engine exposes no filesystem, process, or network
//!   bindings. Execution is bounded by a wall-clock budget enforced through the
//!   engine's interrupt hook and by a heap limit.
//! - A [`SandboxProfile`] describes what a spawned plugin process may inherit
//!   from the host: environment variables, networking, and filesystem access.
//!   Profiles are applied to [`std::process::Command`] builders and rendered as
//!   container runtime arguments.
//!
//! Profiles default to the restrictive configuration: networking is denied,
//! the filesystem is not exposed, and only `PATH` is inherited from the
//! environment.
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use serde_json::json;
//! use tackle_sandbox::{QuickJsSandbox, ScriptGlobals, ScriptLimits, ScriptSandbox};
//!
//! # fn main() -> Result<(), tackle_sandbox::SandboxError> {
//! let code = "module.exports = function (input) { return { doubled: input.n * 2 }; };";
//! let globals = ScriptGlobals::new(json!({ "n": 21 }), json!({ "caller": "docs" }));
//! let limits = ScriptLimits::new(Duration::from_secs(1));
//! let outcome = QuickJsSandbox.run(code, &globals, &limits)?;
//! assert_eq!(outcome.output(), &json!({ "doubled": 42 }));
//! # Ok(()) }
//! ```

mod error;
mod profile;
mod script;

pub use error::SandboxError;
pub use profile::{EnvironmentPolicy, FilesystemPolicy, NetworkPolicy, SandboxProfile};
pub use script::{QuickJsSandbox, ScriptGlobals, ScriptLimits, ScriptOutcome, ScriptSandbox};

#[cfg(test)]
mod tests;
