//! SDK error types.

use std::fmt;

use drover_core::{FaultCode, RegistryError, RpcFault};

/// Errors plugin code returns to the SDK.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// The plugin has no such command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Configuration from the host did not have the expected shape.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The plugin does not support this operation.
    #[error("{0} is not supported by this plugin")]
    Unsupported(&'static str),

    /// A command or hook failed.
    #[error("{0}")]
    Failed(String),

    /// The host went away.
    #[error("connection to host closed")]
    Closed,

    /// A command tree entry collided with another.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SdkError {
    /// A plain failure with a message.
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }

    /// The fault sent to the host for this error.
    pub(crate) fn to_fault(&self) -> RpcFault {
        let code = match self {
            Self::UnknownCommand(_) => FaultCode::UnknownCommand,
            Self::InvalidConfig(_) => FaultCode::InvalidRequest,
            Self::Unsupported(_) => FaultCode::Unimplemented,
            _ => FaultCode::Internal,
        };
        RpcFault::new(code, self.to_string())
    }
}

/// Result type for plugin code.
pub type SdkResult<T> = Result<T, SdkError>;
