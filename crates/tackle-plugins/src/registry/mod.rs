//! Durable, content-addressed store of registered plugin contracts.
//!
//! The [`ArtifactRegistry`] persists one JSON file per `id@version` inside a
//! registry directory. Writes go through a temporary file and an atomic
//! rename, so concurrent readers never see a partial artifact and concurrent
//! registrations of the same key are last-writer-wins. Registration always
//! recomputes the contract's content hash.

use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::contract::PluginContract;
use crate::error::PluginError;
use crate::files::atomic_write;

const REGISTRY_TARGET: &str = "tackle_plugins::registry";

/// Extension of artifact files.
const ARTIFACT_EXTENSION: &str = "json";

/// A registered contract and its registration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryArtifact {
    contract: PluginContract,
    repo_path: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    registered_at: OffsetDateTime,
    content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signer: Option<String>,
}

impl RegistryArtifact {
    /// Returns the registered contract.
    #[must_use]
    pub const fn contract(&self) -> &PluginContract {
        &self.contract
    }

    /// Returns the plugin repository the contract was normalised from.
    #[must_use]
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Returns when the artifact was last written.
    #[must_use]
    pub const fn registered_at(&self) -> OffsetDateTime {
        self.registered_at
    }

    /// Returns the content hash recorded at registration.
    #[must_use]
    pub const fn content_hash(&self) -> &str {
        self.content_hash.as_str()
    }

    /// Returns the base64 key that signed the manifest, if any.
    #[must_use]
    pub fn signer(&self) -> Option<&str> {
        self.signer.as_deref()
    }
}

/// File-backed registry of plugin contracts.
///
/// # Example
///
/// ```rust,no_run
/// use tackle_plugins::ArtifactRegistry;
///
/// let registry = ArtifactRegistry::open("core-registry").expect("registry opens");
/// for artifact in registry.list().expect("listing succeeds") {
///     println!("{}", artifact.contract().key());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactRegistry {
    root: PathBuf,
}

impl ArtifactRegistry {
    /// Opens the registry at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PluginError> {
        let directory: PathBuf = root.into();
        fs::create_dir_all(&directory).map_err(|error| PluginError::io(&directory, error))?;
        Ok(Self { root: directory })
    }

    /// Returns the registry directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the artifact path for `id@version`.
    #[must_use]
    pub fn artifact_path(&self, id: &str, version: &str) -> PathBuf {
        self.root.join(format!("{id}@{version}.{ARTIFACT_EXTENSION}"))
    }

    /// Persists `contract`, recomputing its content hash.
    ///
    /// Re-registering an unchanged contract yields the same hash; only the
    /// registration timestamp changes.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Validation`] if the identity cannot form a file
    /// name, [`PluginError::Json`] if encoding fails, and [`PluginError::Io`]
    /// if the write fails.
    pub fn register(
        &self,
        contract: PluginContract,
        repo_path: &Path,
        signer: Option<&str>,
    ) -> Result<RegistryArtifact, PluginError> {
        ensure_key_component(contract.id(), "plugin id")?;
        ensure_key_component(contract.version(), "plugin version")?;

        let sealed = contract.seal()?;
        let artifact = RegistryArtifact {
            content_hash: sealed.content_hash().to_owned(),
            contract: sealed,
            repo_path: repo_path.to_path_buf(),
            registered_at: OffsetDateTime::now_utc(),
            signer: signer.map(str::to_owned),
        };

        let path = self.artifact_path(artifact.contract.id(), artifact.contract.version());
        let encoded = serde_json::to_vec_pretty(&artifact)?;
        atomic_write(&path, &encoded).map_err(|error| PluginError::io(&path, error))?;

        debug!(
            target: REGISTRY_TARGET,
            plugin = artifact.contract.id(),
            version = artifact.contract.version(),
            content_hash = artifact.content_hash.as_str(),
            "artifact registered"
        );
        Ok(artifact)
    }

    /// Reads an artifact.
    ///
    /// An explicit `version` reads that artifact; `None` resolves the highest
    /// semantic version registered for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] if no matching artifact exists and
    /// [`PluginError::Registry`] if the artifact file is corrupt.
    pub fn get(&self, id: &str, version: Option<&str>) -> Result<RegistryArtifact, PluginError> {
        let not_found = || PluginError::NotFound {
            id: id.to_owned(),
            version: version.map(str::to_owned),
        };
        if !is_key_component(id) {
            return Err(not_found());
        }

        match version {
            Some(explicit) => {
                if !is_key_component(explicit) {
                    return Err(not_found());
                }
                let path = self.artifact_path(id, explicit);
                if !path.is_file() {
                    return Err(not_found());
                }
                read_artifact(&path)
            }
            None => self
                .list()?
                .into_iter()
                .filter(|artifact| artifact.contract.id() == id)
                .max_by(|left, right| version_order(left).cmp(&version_order(right)))
                .ok_or_else(not_found),
        }
    }

    /// Enumerates every readable artifact, ordered by key.
    ///
    /// Unreadable or corrupt files are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the registry directory cannot be read.
    pub fn list(&self) -> Result<Vec<RegistryArtifact>, PluginError> {
        let entries = fs::read_dir(&self.root).map_err(|error| PluginError::io(&self.root, error))?;
        let mut artifacts = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(dir_entry) => dir_entry.path(),
                Err(error) => {
                    warn!(target: REGISTRY_TARGET, %error, "skipping unreadable registry entry");
                    continue;
                }
            };
            if !is_artifact_file(&path) {
                continue;
            }
            match read_artifact(&path) {
                Ok(artifact) => artifacts.push(artifact),
                Err(error) => {
                    warn!(
                        target: REGISTRY_TARGET,
                        path = %path.display(),
                        %error,
                        "skipping unreadable artifact"
                    );
                }
            }
        }
        artifacts.sort_by_key(|artifact| artifact.contract.key());
        Ok(artifacts)
    }
}

fn read_artifact(path: &Path) -> Result<RegistryArtifact, PluginError> {
    let text = fs::read_to_string(path).map_err(|error| PluginError::io(path, error))?;
    serde_json::from_str(&text).map_err(|error| PluginError::Registry {
        path: path.to_path_buf(),
        message: error.to_string(),
    })
}

fn is_artifact_file(path: &Path) -> bool {
    let has_extension = path
        .extension()
        .is_some_and(|extension| extension == ARTIFACT_EXTENSION);
    let keyed = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains('@') && !name.starts_with('.'));
    has_extension && keyed && path.is_file()
}

fn version_order(artifact: &RegistryArtifact) -> (Option<Version>, String) {
    let raw = artifact.contract.version();
    (Version::parse(raw).ok(), raw.to_owned())
}

fn is_key_component(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '+' | '_'))
}

fn ensure_key_component(value: &str, label: &str) -> Result<(), PluginError> {
    if is_key_component(value) {
        Ok(())
    } else {
        Err(PluginError::invalid(format!(
            "{label} '{value}' cannot be used as a registry key"
        )))
    }
}
