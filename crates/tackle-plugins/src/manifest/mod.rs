//! Manifest normalisation into runtime contracts.
//!
//! A plugin repository declares itself through a `plugin.yaml` manifest. The
//! [`ManifestNormalizer`] parses it, validates it structurally against a JSON
//! Schema and semantically against cross-field rules, applies the deployment
//! [`SignaturePolicy`], resolves any template file, and produces a sealed
//! [`PluginContract`]. Every structural and semantic violation is reported in
//! a single [`PluginError::Validation`].

mod schema;
mod signature;

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::contract::{
    IoContract, Permissions, PluginContract, PluginInfo, RuntimeKind, RuntimeSpec, TemplateSpec,
};
use crate::error::PluginError;

pub(crate) use self::schema::{ID_PATTERN, VERSION_PATTERN, compile_violation, validate_against};
pub use self::signature::{SIGNATURE_KEY, SIGNER_KEY, SignaturePolicy, signing_payload};

const MANIFEST_TARGET: &str = "tackle_plugins::manifest";

/// File name of the manifest inside a plugin repository.
pub const MANIFEST_FILE: &str = "plugin.yaml";

/// A contract together with the identity of the key that signed it.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedManifest {
    contract: PluginContract,
    signer: Option<String>,
}

impl NormalizedManifest {
    /// Returns the sealed contract.
    #[must_use]
    pub const fn contract(&self) -> &PluginContract {
        &self.contract
    }

    /// Returns the base64 signer key when the manifest was signed.
    #[must_use]
    pub fn signer(&self) -> Option<&str> {
        self.signer.as_deref()
    }

    /// Splits the manifest into its parts.
    #[must_use]
    pub fn into_parts(self) -> (PluginContract, Option<String>) {
        (self.contract, self.signer)
    }
}

#[derive(Deserialize)]
struct ManifestDocument {
    plugin: PluginInfo,
    runtime: RuntimeSpec,
    contract: IoContract,
    #[serde(default)]
    ui: Option<Value>,
    #[serde(default)]
    permissions: Permissions,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    template: Option<ManifestTemplate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestTemplate {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    path: Option<String>,
    allowed_placeholders: Vec<String>,
    #[serde(default)]
    props_schema: Option<Value>,
}

/// Turns plugin manifests into sealed contracts.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
///
/// use tackle_plugins::{ManifestNormalizer, SignaturePolicy};
///
/// let normalizer = ManifestNormalizer::new(SignaturePolicy::default());
/// let manifest = normalizer.normalize(Path::new("plugins/echo")).expect("valid manifest");
/// println!("{}", manifest.contract().content_hash());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManifestNormalizer {
    policy: SignaturePolicy,
}

impl ManifestNormalizer {
    /// Creates a normalizer enforcing `policy`.
    #[must_use]
    pub const fn new(policy: SignaturePolicy) -> Self {
        Self { policy }
    }

    /// Returns the signing policy.
    #[must_use]
    pub const fn policy(&self) -> &SignaturePolicy {
        &self.policy
    }

    /// Reads and normalises `<repo>/plugin.yaml`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the manifest cannot be read,
    /// [`PluginError::Validation`] listing every violation if it is malformed,
    /// and [`PluginError::Signature`] if the signing policy rejects it.
    pub fn normalize(&self, repo: &Path) -> Result<NormalizedManifest, PluginError> {
        let path = repo.join(MANIFEST_FILE);
        let text = fs::read_to_string(&path).map_err(|error| PluginError::io(&path, error))?;
        let document: Value = serde_saphyr::from_str(&text).map_err(|error| {
            PluginError::invalid(format!("{MANIFEST_FILE} is not valid YAML: {error}"))
        })?;
        self.normalize_document(&document, repo)
    }

    /// Normalises an already-parsed manifest document.
    ///
    /// `repo` anchors relative paths such as `template.path`.
    ///
    /// # Errors
    ///
    /// As for [`ManifestNormalizer::normalize`].
    pub fn normalize_document(
        &self,
        document: &Value,
        repo: &Path,
    ) -> Result<NormalizedManifest, PluginError> {
        validate_against(&schema::manifest_schema(), document, MANIFEST_FILE)?;

        let violations = semantic_violations(document);
        if !violations.is_empty() {
            return Err(PluginError::Validation { violations });
        }

        let signer = self.policy.check(document)?;

        let parsed: ManifestDocument = serde_json::from_value(document.clone())
            .map_err(|error| PluginError::invalid(format!("{MANIFEST_FILE}: {error}")))?;
        let contract = build_contract(parsed, repo)?.seal()?;

        debug!(
            target: MANIFEST_TARGET,
            plugin = contract.id(),
            version = contract.version(),
            signed = signer.is_some(),
            "manifest normalised"
        );
        Ok(NormalizedManifest { contract, signer })
    }
}

fn semantic_violations(document: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    let runtime = &document["runtime"];
    let kind = runtime["type"].as_str().unwrap_or_default();
    let adapter = &runtime["adapter"];
    let adapter_kind = adapter["type"].as_str();

    if kind == RuntimeKind::Docker.as_str() && adapter_kind != Some("docker") {
        violations.push(String::from("runtime of type docker requires a docker adapter"));
    }
    if kind == RuntimeKind::Http.as_str() && adapter_kind != Some("http") {
        violations.push(String::from("runtime of type http requires an http adapter"));
    }
    match adapter_kind {
        Some("docker") if adapter["image"].as_str().is_none() => {
            violations.push(String::from("docker adapter requires an image"));
        }
        Some("http") if adapter["host"].as_str().is_none() => {
            violations.push(String::from("http adapter requires a host"));
        }
        _ => {}
    }
    if let Some(entrypoint) = runtime["entrypoint"].as_str()
        && escapes_repository(entrypoint)
    {
        violations.push(format!(
            "runtime.entrypoint '{entrypoint}' must be a relative path inside the plugin repository"
        ));
    }
    if runtime["inProcess"].as_bool() == Some(true) && kind != RuntimeKind::Nodejs.as_str() {
        violations.push(String::from("inProcess execution is only available to nodejs runtimes"));
    }
    if runtime.get("build").is_some() && runtime.get("buildCommand").is_some() {
        violations.push(String::from("runtime declares both build and buildCommand"));
    }

    violations.extend(compile_violation(&document["contract"]["input"], "contract.input"));
    violations.extend(compile_violation(&document["contract"]["output"], "contract.output"));

    if let Some(template) = document.get("template") {
        match (template.get("body"), template.get("path")) {
            (Some(_), Some(_)) => {
                violations.push(String::from("template declares both body and path"));
            }
            (None, None) => violations.push(String::from("template requires a body or a path")),
            _ => {}
        }
        if let Some(props_schema) = template.get("propsSchema") {
            violations.extend(compile_violation(props_schema, "template.propsSchema"));
        }
    }
    violations
}

fn build_contract(document: ManifestDocument, repo: &Path) -> Result<PluginContract, PluginError> {
    let mut contract = PluginContract::new(document.plugin, document.runtime, document.contract)
        .with_permissions(document.permissions);
    if let Some(ui) = document.ui {
        contract = contract.with_ui(ui);
    }
    if let Some(metadata) = document.metadata {
        contract = contract.with_metadata(metadata);
    }
    if let Some(template) = document.template {
        contract = contract.with_template(resolve_template(template, repo)?);
    }
    Ok(contract)
}

fn resolve_template(template: ManifestTemplate, repo: &Path) -> Result<TemplateSpec, PluginError> {
    let body = match (template.body, template.path) {
        (Some(body), _) => body,
        (None, Some(relative)) => read_template_file(repo, &relative)?,
        (None, None) => return Err(PluginError::invalid("template requires a body or a path")),
    };
    let spec = TemplateSpec::new(body, template.allowed_placeholders);
    Ok(match template.props_schema {
        Some(schema) => spec.with_props_schema(schema),
        None => spec,
    })
}

fn escapes_repository(relative: &str) -> bool {
    Path::new(relative)
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
}

fn read_template_file(repo: &Path, relative: &str) -> Result<String, PluginError> {
    let candidate = repo.join(relative);
    let resolved = candidate
        .canonicalize()
        .map_err(|error| PluginError::io(&candidate, error))?;
    let root = repo
        .canonicalize()
        .map_err(|error| PluginError::io(repo, error))?;
    if !resolved.starts_with(&root) {
        return Err(PluginError::invalid(format!(
            "template.path '{relative}' escapes the plugin repository"
        )));
    }
    fs::read_to_string(&resolved).map_err(|error| PluginError::io(PathBuf::from(&resolved), error))
}

#[cfg(test)]
mod tests;
