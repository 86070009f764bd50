//! Discovery projection listing every registered tool.
//!
//! The projection is a small JSON document (`{tools, generatedAt}`) that
//! front ends read to learn what can be invoked without touching the
//! registry directly. It is rewritten atomically after every registration or
//! build.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::contract::RuntimeKind;
use crate::error::PluginError;
use crate::files::atomic_write;
use crate::registry::RegistryArtifact;

const DISCOVERY_TARGET: &str = "tackle_plugins::discovery";

/// One entry in the discovery projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEntry {
    /// Plugin identifier.
    pub id: String,
    /// Plugin version.
    pub version: String,
    /// Runtime family.
    pub runtime: RuntimeKind,
}

/// Discovery document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolList {
    /// Registered tools in key order.
    pub tools: Vec<ToolEntry>,
    /// When the projection was generated.
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

impl ToolList {
    /// Projects registry artifacts into a tool list.
    #[must_use]
    pub fn from_artifacts(artifacts: &[RegistryArtifact]) -> Self {
        let tools = artifacts
            .iter()
            .map(|artifact| {
                let contract = artifact.contract();
                ToolEntry {
                    id: contract.id().to_owned(),
                    version: contract.version().to_owned(),
                    runtime: contract.runtime().kind(),
                }
            })
            .collect();
        Self {
            tools,
            generated_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Writes the discovery projection to a fixed path.
#[derive(Debug, Clone)]
pub struct DiscoveryWriter {
    path: PathBuf,
}

impl DiscoveryWriter {
    /// Creates a writer targeting `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the projection path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Regenerates the projection from `artifacts`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the file cannot be written.
    pub fn refresh(&self, artifacts: &[RegistryArtifact]) -> Result<ToolList, PluginError> {
        let list = ToolList::from_artifacts(artifacts);
        let encoded = serde_json::to_vec_pretty(&list)?;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| PluginError::io(parent, error))?;
        }
        atomic_write(&self.path, &encoded).map_err(|error| PluginError::io(&self.path, error))?;
        debug!(
            target: DISCOVERY_TARGET,
            tools = list.tools.len(),
            path = %self.path.display(),
            "discovery projection refreshed"
        );
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::contract::{IoContract, PluginContract, PluginInfo, RuntimeSpec};
    use crate::registry::ArtifactRegistry;

    #[test]
    fn refresh_writes_tools_and_timestamp() {
        let dir = TempDir::new().expect("temp dir");
        let registry = ArtifactRegistry::open(dir.path().join("registry")).expect("open");
        let contract = PluginContract::new(
            PluginInfo::new("echo", "1.0.0", "Echo"),
            RuntimeSpec::new(RuntimeKind::Python, "main.py"),
            IoContract::new(json!({}), json!({})),
        );
        registry
            .register(contract, dir.path(), None)
            .expect("register");

        let writer = DiscoveryWriter::new(dir.path().join("out/tool-list.json"));
        writer.refresh(&registry.list().expect("list")).expect("refresh");

        let raw = fs::read_to_string(writer.path()).expect("read projection");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(
            value["tools"],
            json!([{ "id": "echo", "version": "1.0.0", "runtime": "python" }])
        );
        assert!(value["generatedAt"].is_string());
    }
}
