//! Host policy for plugin capability requests.
//!
//! A plugin declares what it needs in a [`Capabilities`] block. The
//! [`CapabilityValidator`] checks that block once, at load time, against a
//! [`CapabilityPolicy`]. Nothing is re-checked while the plugin runs.
//!
//! Declared paths are matched after expanding a leading `~` to the user's
//! home directory. Relative paths are taken relative to the plugin's
//! directory, which is the working directory it is launched in; they may
//! not contain `..`.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use drover_core::Capabilities;

/// System locations a plugin may never declare.
const DENIED_SYSTEM_PREFIXES: &[&str] = &[
    "/etc", "/sys", "/proc", "/boot", "/dev", "/root", "/bin", "/sbin", "/usr", "/var", "/home",
];

/// External commands a plugin may declare.
const ALLOWED_COMMANDS: &[&str] = &[
    "docker",
    "docker-compose",
    "git",
    "make",
    "node",
    "npm",
    "npx",
    "yarn",
    "pnpm",
    "go",
    "cargo",
    "rustc",
    "python",
    "python3",
    "pip",
    "pip3",
    "php",
    "composer",
    "ruby",
    "bundle",
    "java",
    "mvn",
    "gradle",
    "dotnet",
    "kubectl",
    "helm",
    "terraform",
];

/// Which capabilities the host grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityPolicy {
    /// Plugins may require a container runtime.
    pub allow_docker: bool,
    /// Plugins may require network access.
    pub allow_network: bool,
    /// Plugins may require filesystem access.
    pub allow_filesystem: bool,
    /// Path prefixes no declared path may fall under.
    pub denied_path_prefixes: Vec<PathBuf>,
    /// External commands a plugin may declare.
    pub allowed_commands: Vec<String>,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        let mut denied: Vec<PathBuf> = DENIED_SYSTEM_PREFIXES.iter().map(PathBuf::from).collect();
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            if !denied.contains(&home) {
                denied.push(home);
            }
        }
        Self {
            allow_docker: true,
            allow_network: false,
            allow_filesystem: false,
            denied_path_prefixes: denied,
            allowed_commands: ALLOWED_COMMANDS.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// A capability request the policy refuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityViolation {
    /// Container runtime requested but not allowed.
    #[error("capability 'docker' is not allowed by host policy")]
    DockerDenied,
    /// Network access requested but not allowed.
    #[error("capability 'network' is not allowed by host policy")]
    NetworkDenied,
    /// Filesystem access requested but not allowed.
    #[error("capability 'filesystem' is not allowed by host policy")]
    FilesystemDenied,
    /// A declared path falls under a denied prefix.
    #[error("path '{path}' is under denied prefix '{prefix}'")]
    DeniedPath {
        /// Declared path.
        path: String,
        /// Matching prefix.
        prefix: String,
    },
    /// A declared path climbs out with `..`.
    #[error("path '{0}' contains a parent-directory component")]
    PathTraversal(String),
    /// A `~` path that cannot be expanded: another user's home, or no home
    /// directory is known.
    #[error("path '{0}' cannot be resolved to a home directory")]
    UnresolvableHome(String),
    /// A declared command is not on the allow-list.
    #[error("command '{0}' is not in the allowed command list")]
    CommandNotAllowed(String),
}

/// Checks [`Capabilities`] against a [`CapabilityPolicy`].
#[derive(Debug, Clone, Default)]
pub struct CapabilityValidator {
    policy: CapabilityPolicy,
}

impl CapabilityValidator {
    /// Create a validator for the given policy.
    #[must_use]
    pub fn new(policy: CapabilityPolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    /// Validate a capability block.
    ///
    /// Returns advisory warnings (for example unset environment variables)
    /// on success.
    ///
    /// # Errors
    ///
    /// Returns the first [`CapabilityViolation`] found.
    pub fn validate(&self, caps: &Capabilities) -> Result<Vec<String>, CapabilityViolation> {
        if caps.docker && !self.policy.allow_docker {
            return Err(CapabilityViolation::DockerDenied);
        }
        if caps.network && !self.policy.allow_network {
            return Err(CapabilityViolation::NetworkDenied);
        }
        if caps.filesystem && !self.policy.allow_filesystem {
            return Err(CapabilityViolation::FilesystemDenied);
        }

        for path in &caps.paths {
            self.check_path(path)?;
        }

        for command in &caps.commands {
            if !self.policy.allowed_commands.iter().any(|c| c == command) {
                return Err(CapabilityViolation::CommandNotAllowed(command.clone()));
            }
        }

        let warnings = caps
            .env_vars
            .iter()
            .filter(|var| std::env::var_os(var).is_none())
            .map(|var| format!("required environment variable {var} is not set"))
            .collect();

        if !caps.config_keys.is_empty() {
            debug!(keys = ?caps.config_keys, "plugin declares configuration keys");
        }

        Ok(warnings)
    }

    fn check_path(&self, declared: &str) -> Result<(), CapabilityViolation> {
        if Path::new(declared)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(CapabilityViolation::PathTraversal(declared.to_string()));
        }
        let path = expand_home(declared)?;
        match self
            .policy
            .denied_path_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            Some(prefix) => Err(CapabilityViolation::DeniedPath {
                path: declared.to_string(),
                prefix: prefix.display().to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Expand `~` and `~/...` against the current user's home directory.
fn expand_home(declared: &str) -> Result<PathBuf, CapabilityViolation> {
    let Some(rest) = declared.strip_prefix('~') else {
        return Ok(PathBuf::from(declared));
    };
    let unresolvable = || CapabilityViolation::UnresolvableHome(declared.to_string());
    if !rest.is_empty() && !rest.starts_with('/') {
        return Err(unresolvable());
    }
    let home = directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(unresolvable)?;
    Ok(home.join(rest.trim_start_matches('/')))
}
