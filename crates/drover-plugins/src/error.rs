//! Plugin runtime error types.

use std::fmt;
use std::path::PathBuf;

use crate::lifecycle::{LifecycleAction, PluginState};
use crate::rpc::RpcError;

/// Which validator step rejected a plugin executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationStep {
    /// Execute bit, writable bits, parent directory.
    Permissions,
    /// File owner.
    Ownership,
    /// Content digest against the manifest.
    Checksum,
    /// Executable header sniff.
    Format,
    /// Declared capabilities against host policy.
    Capabilities,
    /// The file could not be read.
    Io,
}

impl fmt::Display for ValidationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Permissions => "permissions",
            Self::Ownership => "ownership",
            Self::Checksum => "checksum",
            Self::Format => "format",
            Self::Capabilities => "capabilities",
            Self::Io => "io",
        })
    }
}

/// Errors from plugin runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The security validator rejected the executable. Nothing was launched.
    #[error("validation failed for {path} at {step} check: {reason}")]
    Validation {
        /// The rejected executable.
        path: PathBuf,
        /// The step that failed.
        step: ValidationStep,
        /// Literal reason, including digests or capability names.
        reason: String,
    },

    /// The plugin answered the handshake or metadata call with something
    /// the host does not accept.
    #[error("handshake with {plugin} failed: {message}")]
    Handshake {
        /// Executable path or plugin name.
        plugin: String,
        /// What disagreed.
        message: String,
    },

    /// The process could not be started, or did not finish the handshake or
    /// metadata fetch in time.
    #[error("failed to launch {plugin}: {message}")]
    Launch {
        /// Executable path or plugin name.
        plugin: String,
        /// Failure reason.
        message: String,
    },

    /// Transport failure during an otherwise valid session.
    #[error("RPC to {plugin} failed: {source}")]
    Rpc {
        /// Plugin name.
        plugin: String,
        /// Underlying transport error.
        #[source]
        source: RpcError,
    },

    /// No loaded plugin has this name or alias.
    #[error("plugin not found: {0}")]
    NotFound(String),

    /// The plugin has no command with this name or alias.
    #[error("plugin '{plugin}' has no command '{command}'")]
    CommandNotFound {
        /// Plugin name.
        plugin: String,
        /// Requested command.
        command: String,
    },

    /// A name or alias is already taken by another loaded plugin.
    #[error("plugin already registered: {0}")]
    AlreadyRegistered(String),

    /// A lifecycle hook the plugin implements returned an error.
    #[error("{hook} hook of {plugin} failed: {message}")]
    Lifecycle {
        /// Plugin name.
        plugin: String,
        /// Hook name.
        hook: &'static str,
        /// Error reported by the plugin.
        message: String,
    },

    /// The requested transition is not allowed from the current state.
    #[error("cannot {action} plugin {plugin} in state {from}")]
    InvalidTransition {
        /// Plugin name.
        plugin: String,
        /// Attempted action.
        action: LifecycleAction,
        /// State at the time of the attempt.
        from: PluginState,
    },

    /// The plugin has been stopped and accepts no further calls.
    #[error("plugin {0} is stopped")]
    Stopped(String),

    /// Interactive used for a unary command or the other way round.
    #[error("usage error: {0}")]
    Usage(String),

    /// The interactive session is no longer open.
    #[error("interactive session {session} of {plugin} is closed")]
    SessionClosed {
        /// Plugin name.
        plugin: String,
        /// Session id.
        session: u64,
    },

    /// A manifest file could not be read or parsed.
    #[error("manifest parse error in {path}: {message}")]
    Manifest {
        /// Manifest path.
        path: PathBuf,
        /// Parse error message.
        message: String,
    },

    /// The host configuration file could not be read or parsed.
    #[error("config error in {path}: {message}")]
    Config {
        /// Config path.
        path: PathBuf,
        /// Parse error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Build a validation error.
    pub(crate) fn validation(
        path: impl Into<PathBuf>,
        step: ValidationStep,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            path: path.into(),
            step,
            reason: reason.into(),
        }
    }

    /// The validator step, if this is a validation error.
    #[must_use]
    pub fn validation_step(&self) -> Option<ValidationStep> {
        match self {
            Self::Validation { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Result type for plugin runtime operations.
pub type PluginResult<T> = Result<T, PluginError>;
