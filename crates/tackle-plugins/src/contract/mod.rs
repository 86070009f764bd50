//! Runtime contract types produced by manifest normalisation.
//!
//! A [`PluginContract`] is the canonical, immutable description of a
//! registered plugin: its identity, how it runs, the JSON Schemas bounding its
//! input and output, the permissions it declares, and an optional invocation
//! template. The contract carries a content hash computed over the canonical
//! serialisation of its identity-bearing sections.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical;
use crate::error::PluginError;

/// Runtime family a plugin is implemented in.
///
/// # Example
///
/// ```
/// use tackle_plugins::RuntimeKind;
///
/// assert_eq!(RuntimeKind::Nodejs.as_str(), "nodejs");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// JavaScript executed by a Node.js interpreter or the script sandbox.
    Nodejs,
    /// Python executed by a Python interpreter.
    Python,
    /// Entrypoint executed inside a container image.
    Docker,
    /// Entrypoint executed directly as a native program.
    Binary,
    /// Remote service reached over HTTP.
    Http,
}

impl RuntimeKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nodejs => "nodejs",
            Self::Python => "python",
            Self::Docker => "docker",
            Self::Binary => "binary",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External execution substrate attached to a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Adapter {
    /// Remote HTTP service; `host` may include a scheme and port.
    Http {
        /// Service host, e.g. `localhost:8080` or `https://tools.example`.
        host: String,
    },
    /// Container image that runs the entrypoint.
    Docker {
        /// Image reference.
        image: String,
    },
}

/// How a plugin is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    #[serde(rename = "type")]
    kind: RuntimeKind,
    entrypoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(default, alias = "build", skip_serializing_if = "Option::is_none")]
    build_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    adapter: Option<Adapter>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    in_process: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
}

impl RuntimeSpec {
    /// Creates a runtime with no adapter, build command, or overrides.
    #[must_use]
    pub fn new(kind: RuntimeKind, entrypoint: impl Into<String>) -> Self {
        Self {
            kind,
            entrypoint: entrypoint.into(),
            language: None,
            build_command: None,
            adapter: None,
            in_process: false,
            timeout_secs: None,
        }
    }

    /// Sets the build command run in the plugin repository.
    #[must_use]
    pub fn with_build_command(mut self, command: impl Into<String>) -> Self {
        self.build_command = Some(command.into());
        self
    }

    /// Attaches an execution adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Marks a Node.js handler as trusted for in-process execution.
    #[must_use]
    pub const fn in_process(mut self) -> Self {
        self.in_process = true;
        self
    }

    /// Overrides the backend timeout for this plugin.
    #[must_use]
    pub const fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Returns the runtime family.
    #[must_use]
    pub const fn kind(&self) -> RuntimeKind {
        self.kind
    }

    /// Returns the entrypoint, relative to the plugin repository.
    #[must_use]
    pub const fn entrypoint(&self) -> &str {
        self.entrypoint.as_str()
    }

    /// Returns the declared implementation language, if any.
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Returns the build command, if any.
    #[must_use]
    pub fn build_command(&self) -> Option<&str> {
        self.build_command.as_deref()
    }

    /// Returns the execution adapter, if any.
    #[must_use]
    pub const fn adapter(&self) -> Option<&Adapter> {
        self.adapter.as_ref()
    }

    /// Returns true when the handler may run in the script sandbox.
    #[must_use]
    pub const fn is_in_process(&self) -> bool {
        self.in_process
    }

    /// Returns the per-plugin timeout override.
    #[must_use]
    pub const fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }
}

/// Plugin identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    id: String,
    version: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl PluginInfo {
    /// Creates an identity bundle.
    #[must_use]
    pub fn new(id: impl Into<String>, version: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            name: name.into(),
            author: None,
            description: None,
        }
    }

    /// Returns the plugin identifier.
    #[must_use]
    pub const fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Returns the semantic version string.
    #[must_use]
    pub const fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Returns the display name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the author, if declared.
    #[must_use]
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Returns the description, if declared.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Input and output JSON Schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoContract {
    input: Value,
    output: Value,
}

impl IoContract {
    /// Creates a schema pair.
    #[must_use]
    pub const fn new(input: Value, output: Value) -> Self {
        Self { input, output }
    }

    /// Returns the input schema.
    #[must_use]
    pub const fn input(&self) -> &Value {
        &self.input
    }

    /// Returns the output schema.
    #[must_use]
    pub const fn output(&self) -> &Value {
        &self.output
    }

    /// Returns the property names listed in the input schema's `required`.
    #[must_use]
    pub fn required_inputs(&self) -> Vec<&str> {
        self.input
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Filesystem access a plugin declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemAccess {
    /// Read-only access to the plugin directory.
    Read,
    /// Read-write access to the plugin directory.
    Write,
    /// No filesystem access.
    #[default]
    None,
}

/// Capabilities a plugin declares; the dispatcher enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    network: bool,
    #[serde(default)]
    filesystem: FilesystemAccess,
    #[serde(default)]
    env: bool,
    #[serde(default)]
    ai: bool,
}

impl Permissions {
    /// Grants network access.
    #[must_use]
    pub const fn with_network(mut self) -> Self {
        self.network = true;
        self
    }

    /// Sets the filesystem access level.
    #[must_use]
    pub const fn with_filesystem(mut self, access: FilesystemAccess) -> Self {
        self.filesystem = access;
        self
    }

    /// Grants access to the host environment.
    #[must_use]
    pub const fn with_env(mut self) -> Self {
        self.env = true;
        self
    }

    /// Returns true when network access is declared.
    #[must_use]
    pub const fn network(&self) -> bool {
        self.network
    }

    /// Returns the declared filesystem access.
    #[must_use]
    pub const fn filesystem(&self) -> FilesystemAccess {
        self.filesystem
    }

    /// Returns true when host environment access is declared.
    #[must_use]
    pub const fn env(&self) -> bool {
        self.env
    }

    /// Returns true when AI service access is declared.
    #[must_use]
    pub const fn ai(&self) -> bool {
        self.ai
    }
}

/// Resolved invocation template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    body: String,
    allowed_placeholders: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    props_schema: Option<Value>,
}

impl TemplateSpec {
    /// Creates a template with the given body and allow-list.
    #[must_use]
    pub fn new(body: impl Into<String>, allowed_placeholders: Vec<String>) -> Self {
        Self {
            body: body.into(),
            allowed_placeholders,
            props_schema: None,
        }
    }

    /// Attaches a JSON Schema the props must satisfy.
    #[must_use]
    pub fn with_props_schema(mut self, schema: Value) -> Self {
        self.props_schema = Some(schema);
        self
    }

    /// Returns the template body.
    #[must_use]
    pub const fn body(&self) -> &str {
        self.body.as_str()
    }

    /// Returns the placeholder allow-list.
    #[must_use]
    pub fn allowed_placeholders(&self) -> &[String] {
        &self.allowed_placeholders
    }

    /// Returns the props schema, if any.
    #[must_use]
    pub const fn props_schema(&self) -> Option<&Value> {
        self.props_schema.as_ref()
    }
}

/// Canonical runtime contract for a plugin.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use tackle_plugins::{IoContract, PluginContract, PluginInfo, RuntimeKind, RuntimeSpec};
///
/// let contract = PluginContract::new(
///     PluginInfo::new("echo", "1.0.0", "Echo"),
///     RuntimeSpec::new(RuntimeKind::Binary, "run.sh"),
///     IoContract::new(json!({"type": "object"}), json!({"type": "object"})),
/// )
/// .seal()
/// .expect("contract hashes");
///
/// assert_eq!(contract.key(), "echo@1.0.0");
/// assert!(contract.hash_matches().expect("hash recomputes"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginContract {
    plugin: PluginInfo,
    runtime: RuntimeSpec,
    contract: IoContract,
    #[serde(default = "empty_object")]
    ui: Value,
    #[serde(default)]
    permissions: Permissions,
    #[serde(default = "empty_object")]
    metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template: Option<TemplateSpec>,
    #[serde(default)]
    content_hash: String,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Sections covered by the content hash.
#[derive(Serialize)]
struct HashedSections<'a> {
    plugin: &'a PluginInfo,
    runtime: &'a RuntimeSpec,
    contract: &'a IoContract,
    ui: &'a Value,
    permissions: &'a Permissions,
    metadata: &'a Value,
}

impl PluginContract {
    /// Creates an unsealed contract with empty optional sections.
    #[must_use]
    pub fn new(plugin: PluginInfo, runtime: RuntimeSpec, contract: IoContract) -> Self {
        Self {
            plugin,
            runtime,
            contract,
            ui: empty_object(),
            permissions: Permissions::default(),
            metadata: empty_object(),
            template: None,
            content_hash: String::new(),
        }
    }

    /// Sets the declared permissions.
    #[must_use]
    pub const fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Sets the UI hints.
    #[must_use]
    pub fn with_ui(mut self, ui: Value) -> Self {
        self.ui = ui;
        self
    }

    /// Sets free-form metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attaches an invocation template.
    #[must_use]
    pub fn with_template(mut self, template: TemplateSpec) -> Self {
        self.template = Some(template);
        self
    }

    /// Recomputes and stores the content hash.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Json`] if the contract cannot be serialised.
    pub fn seal(mut self) -> Result<Self, PluginError> {
        self.content_hash = self.compute_hash()?;
        Ok(self)
    }

    /// Computes the content hash without storing it.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Json`] if the contract cannot be serialised.
    pub fn compute_hash(&self) -> Result<String, PluginError> {
        let sections = serde_json::to_value(HashedSections {
            plugin: &self.plugin,
            runtime: &self.runtime,
            contract: &self.contract,
            ui: &self.ui,
            permissions: &self.permissions,
            metadata: &self.metadata,
        })?;
        Ok(canonical::content_hash(&sections))
    }

    /// Returns true when the stored hash equals a fresh recomputation.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Json`] if the contract cannot be serialised.
    pub fn hash_matches(&self) -> Result<bool, PluginError> {
        Ok(self.compute_hash()? == self.content_hash)
    }

    /// Returns `id@version`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}@{}", self.plugin.id, self.plugin.version)
    }

    /// Returns the plugin identifier.
    #[must_use]
    pub const fn id(&self) -> &str {
        self.plugin.id()
    }

    /// Returns the plugin version.
    #[must_use]
    pub const fn version(&self) -> &str {
        self.plugin.version()
    }

    /// Returns the identity section.
    #[must_use]
    pub const fn plugin(&self) -> &PluginInfo {
        &self.plugin
    }

    /// Returns the runtime section.
    #[must_use]
    pub const fn runtime(&self) -> &RuntimeSpec {
        &self.runtime
    }

    /// Returns the input/output schemas.
    #[must_use]
    pub const fn io(&self) -> &IoContract {
        &self.contract
    }

    /// Returns the UI hints.
    #[must_use]
    pub const fn ui(&self) -> &Value {
        &self.ui
    }

    /// Returns the declared permissions.
    #[must_use]
    pub const fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    /// Returns the free-form metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Returns the invocation template, if any.
    #[must_use]
    pub const fn template(&self) -> Option<&TemplateSpec> {
        self.template.as_ref()
    }

    /// Returns the stored content hash.
    #[must_use]
    pub const fn content_hash(&self) -> &str {
        self.content_hash.as_str()
    }
}
