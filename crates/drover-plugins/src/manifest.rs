//! Side-car plugin manifests.
//!
//! A manifest is an optional YAML or JSON document shipped next to a plugin
//! executable. It lets the host verify the binary (checksum, capabilities,
//! homepage) *before* launching it. Without one, loading proceeds and the
//! manifest-based checks are skipped.
//!
//! ```yaml
//! apiVersion: drover.dev/v1
//! kind: Plugin
//! metadata:
//!   name: hello
//!   version: 1.0.0
//!   homepage: https://github.com/drover-dev/hello
//! spec:
//!   executable:
//!     name: hello-plugin
//!     checksum: sha256:9f86d0...
//!   capabilities:
//!     docker: true
//!     commands: [docker]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use drover_core::{Capabilities, Command, PluginDescriptor};

use crate::error::{PluginError, PluginResult};

/// File names tried, in order, next to an executable.
pub const SIDECAR_NAMES: &[&str] = &["plugin.yaml", "plugin.yml", "plugin.json"];

/// A parsed plugin manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginManifest {
    /// Manifest schema version, e.g. `drover.dev/v1`.
    pub api_version: String,
    /// Document kind, normally `Plugin`.
    pub kind: String,
    /// Identity block.
    pub metadata: PluginDescriptor,
    /// Executable, commands, capabilities and configuration.
    pub spec: ManifestSpec,
}

/// The `spec` block of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManifestSpec {
    /// Executable file name and digest.
    pub executable: ExecutableSpec,
    /// Commands the plugin is expected to expose.
    pub commands: Vec<Command>,
    /// Capabilities the plugin requires.
    pub capabilities: Capabilities,
    /// Free-form configuration, handed to the plugin's `configure` hook
    /// when the caller supplies none.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

/// The `spec.executable` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutableSpec {
    /// File name of the executable, relative to the manifest.
    pub name: String,
    /// Expected digest, `sha256:<hex>` or bare `<hex>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl PluginManifest {
    /// Parse a manifest from YAML or JSON text.
    ///
    /// `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] if the text does not parse.
    pub fn parse(content: &str, path: &Path) -> PluginResult<Self> {
        // YAML is a superset of JSON, so one parser covers both formats.
        serde_yaml::from_str(content).map_err(|e| PluginError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] if the file cannot be read or
    /// parsed.
    pub fn load(path: impl AsRef<Path>) -> PluginResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PluginError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content, path)
    }

    /// Find the side-car manifest for an executable, if one exists.
    #[must_use]
    pub fn find_sidecar(executable: &Path) -> Option<PathBuf> {
        let dir = executable.parent()?;
        SIDECAR_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// The declared checksum, if any.
    #[must_use]
    pub fn checksum(&self) -> Option<&str> {
        self.spec
            .executable
            .checksum
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// The declared homepage, if any.
    #[must_use]
    pub fn homepage(&self) -> Option<&str> {
        self.metadata.homepage.as_deref()
    }
}
