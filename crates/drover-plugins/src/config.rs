//! Host-side plugin runtime configuration.
//!
//! Loaded from the `[plugins]`-style TOML document the host keeps next to
//! its other settings. Every section and field has a default, so an empty
//! document is a valid configuration.
//!
//! ```toml
//! handshake_timeout_secs = 10
//! metadata_timeout_secs = 10
//! shutdown_grace_secs = 5
//!
//! [security]
//! trusted_sources = ["github.com", "plugins.drover.dev"]
//!
//! [capabilities]
//! allow_network = true
//! allowed_commands = ["git", "docker"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capabilities::CapabilityPolicy;
use crate::error::{PluginError, PluginResult};

/// Settings for the source-trust check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Hosts a plugin homepage may point at. Empty disables the check.
    pub trusted_sources: Vec<String>,
}

/// Plugin runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Seconds to wait for a launched plugin's greeting.
    pub handshake_timeout_secs: u64,
    /// Seconds to wait for the metadata answer after the greeting.
    pub metadata_timeout_secs: u64,
    /// Seconds a plugin gets to exit after being asked to stop.
    pub shutdown_grace_secs: u64,
    /// Source-trust settings.
    pub security: SecurityConfig,
    /// Capability policy.
    pub capabilities: CapabilityPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 10,
            metadata_timeout_secs: 10,
            shutdown_grace_secs: 5,
            security: SecurityConfig::default(),
            capabilities: CapabilityPolicy::default(),
        }
    }
}

impl HostConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Config`] if the document is not valid TOML or
    /// has fields of the wrong type.
    pub fn from_toml_str(content: &str) -> PluginResult<Self> {
        toml::from_str(content).map_err(|e| PluginError::Config {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> PluginResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PluginError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = toml::from_str(&content).map_err(|e| PluginError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), "loaded plugin host config");
        Ok(config)
    }

    /// Handshake timeout.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Metadata fetch timeout.
    #[must_use]
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    /// Shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_secs = grace.as_secs();
        self
    }
}
