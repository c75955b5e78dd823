//! Handshake constants and the stdio wire format.
//!
//! After the host launches a plugin executable, the plugin writes a single
//! [`Hello`] line to stdout. Every line after that, in both directions, is a
//! JSON-encoded [`Frame`]:
//!
//! ```text
//! host   -> plugin   {"frame":"request","id":1,"method":{"name":"get_metadata"}}
//! plugin -> host     {"frame":"response","id":1,"outcome":{"ok":{...}}}
//! host   -> plugin   {"frame":"stream","session":7,"message":{"type":"stdin","data":"aGkK"}}
//! host   -> plugin   {"frame":"close_session","session":7}
//! ```
//!
//! Stdout of a plugin process is reserved for frames; plugins log to stderr.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::{Capabilities, Command, PluginDescriptor};
use crate::exec::{ExecuteRequest, StreamMessage};

/// Environment variable the host sets on every plugin process.
pub const MAGIC_COOKIE_KEY: &str = "DROVER_PLUGIN_MAGIC_COOKIE";

/// Value of [`MAGIC_COOKIE_KEY`]. Not a secret; it only proves the process
/// was started by a Drover host rather than run by hand.
pub const MAGIC_COOKIE_VALUE: &str = "5f2a9c41d7e04b8a93c6e1f07d2b48ac";

/// Wire protocol version. Host and plugin must match exactly.
pub const PROTOCOL_VERSION: u32 = 2;

/// Service name a v2 plugin registers itself under.
pub const SERVICE_NAME: &str = "drover.plugin.v2";

/// The parameters both sides must agree on before any RPC is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Environment variable carrying the cookie.
    pub magic_cookie_key: String,
    /// Expected cookie value.
    pub magic_cookie_value: String,
    /// Expected protocol version.
    pub protocol_version: u32,
    /// Expected service name.
    pub service: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            magic_cookie_key: MAGIC_COOKIE_KEY.to_string(),
            magic_cookie_value: MAGIC_COOKIE_VALUE.to_string(),
            protocol_version: PROTOCOL_VERSION,
            service: SERVICE_NAME.to_string(),
        }
    }
}

impl HandshakeConfig {
    /// The greeting a plugin speaking this configuration sends.
    #[must_use]
    pub fn hello(&self, sdk_version: impl Into<String>) -> Hello {
        Hello {
            magic_cookie: self.magic_cookie_value.clone(),
            protocol_version: self.protocol_version,
            service: self.service.clone(),
            sdk_version: sdk_version.into(),
        }
    }

    /// Check a plugin's greeting against this configuration.
    ///
    /// # Errors
    ///
    /// Returns the first field that disagrees.
    pub fn verify(&self, hello: &Hello) -> Result<(), HandshakeMismatch> {
        if hello.magic_cookie != self.magic_cookie_value {
            return Err(HandshakeMismatch::MagicCookie);
        }
        if hello.protocol_version != self.protocol_version {
            return Err(HandshakeMismatch::ProtocolVersion {
                expected: self.protocol_version,
                actual: hello.protocol_version,
            });
        }
        if hello.service != self.service {
            return Err(HandshakeMismatch::Service {
                expected: self.service.clone(),
                actual: hello.service.clone(),
            });
        }
        Ok(())
    }
}

/// Why a greeting was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeMismatch {
    /// Wrong or missing cookie.
    #[error("magic cookie mismatch")]
    MagicCookie,
    /// Protocol versions differ.
    #[error("protocol version mismatch: host speaks {expected}, plugin speaks {actual}")]
    ProtocolVersion {
        /// Host version.
        expected: u32,
        /// Plugin version.
        actual: u32,
    },
    /// Service names differ.
    #[error("service mismatch: expected '{expected}', got '{actual}'")]
    Service {
        /// Host service name.
        expected: String,
        /// Plugin service name.
        actual: String,
    },
}

/// First line a plugin writes to stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Echo of the cookie found in the environment.
    pub magic_cookie: String,
    /// Protocol version the plugin speaks.
    pub protocol_version: u32,
    /// Service name the plugin registers under.
    pub service: String,
    /// SDK version the plugin was built with.
    pub sdk_version: String,
}

/// A remote call from host to plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "params", rename_all = "snake_case")]
pub enum Method {
    /// Fetch a [`MetadataResponse`].
    GetMetadata,
    /// Hand the plugin its configuration document.
    Configure {
        /// Plugin-defined configuration.
        config: Value,
    },
    /// Optional `Init` hook.
    Init,
    /// Optional `Start` hook.
    Start,
    /// Optional `Stop` hook.
    Stop,
    /// Optional health check, answered with a [`HealthReport`].
    HealthCheck,
    /// Run a unary command, answered with an `ExecuteResponse`.
    Execute {
        /// The invocation.
        request: ExecuteRequest,
    },
    /// Open an interactive session. Answered once the session is accepted;
    /// output then flows as [`Frame::Stream`] frames tagged with `session`.
    StartInteractive {
        /// Host-chosen session id.
        session: u64,
        /// The invocation.
        request: ExecuteRequest,
    },
}

impl Method {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetMetadata => "get_metadata",
            Self::Configure { .. } => "configure",
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::HealthCheck => "health_check",
            Self::Execute { .. } => "execute",
            Self::StartInteractive { .. } => "start_interactive",
        }
    }
}

/// Machine-readable failure class of an [`RpcFault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// The plugin does not implement this optional hook.
    Unimplemented,
    /// No such command.
    UnknownCommand,
    /// Malformed parameters.
    InvalidRequest,
    /// The handler ran and failed.
    Internal,
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unimplemented => "unimplemented",
            Self::UnknownCommand => "unknown_command",
            Self::InvalidRequest => "invalid_request",
            Self::Internal => "internal",
        })
    }
}

/// An error answer to a [`Method`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcFault {
    /// Failure class.
    pub code: FaultCode,
    /// Human-readable detail.
    pub message: String,
}

impl RpcFault {
    /// Build a fault.
    #[must_use]
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The hook is not implemented.
    #[must_use]
    pub fn unimplemented(method: &str) -> Self {
        Self::new(FaultCode::Unimplemented, format!("{method} is not implemented"))
    }

    /// Whether the peer reported a missing optional hook.
    #[must_use]
    pub fn is_unimplemented(&self) -> bool {
        self.code == FaultCode::Unimplemented
    }
}

/// Success or failure of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Method-specific result value.
    Ok(Value),
    /// The call failed.
    Err(RpcFault),
}

impl Outcome {
    /// Wrap a serializable value, turning encoding failures into an
    /// `internal` fault.
    pub fn from_value<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::Ok(value),
            Err(e) => Self::Err(RpcFault::new(FaultCode::Internal, e.to_string())),
        }
    }

    /// Successful call with no result.
    #[must_use]
    pub fn unit() -> Self {
        Self::Ok(Value::Null)
    }
}

impl From<Result<Value, RpcFault>> for Outcome {
    fn from(result: Result<Value, RpcFault>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(fault) => Self::Err(fault),
        }
    }
}

impl From<Outcome> for Result<Value, RpcFault> {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(fault) => Err(fault),
        }
    }
}

/// One line on the wire after the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    /// Host → plugin call.
    Request {
        /// Correlation id, unique per connection.
        id: u64,
        /// The call.
        method: Method,
    },
    /// Plugin → host answer.
    Response {
        /// Id of the request being answered.
        id: u64,
        /// Result.
        outcome: Outcome,
    },
    /// Interactive session traffic, either direction.
    Stream {
        /// Session id from [`Method::StartInteractive`].
        session: u64,
        /// Payload.
        message: StreamMessage,
    },
    /// Host → plugin: the caller abandoned the session.
    CloseSession {
        /// Session id.
        session: u64,
    },
}

impl Frame {
    /// Encode as a single newline-terminated line.
    ///
    /// # Errors
    ///
    /// Fails only if a contained value cannot be represented as JSON.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one line, with or without its trailing newline.
    ///
    /// # Errors
    ///
    /// Fails if the line is not a valid frame.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }
}

/// Answer to [`Method::GetMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataResponse {
    /// Plugin identity.
    pub descriptor: PluginDescriptor,
    /// Declared commands.
    pub commands: Vec<Command>,
    /// Declared capabilities.
    pub capabilities: Capabilities,
}

/// Answer to [`Method::HealthCheck`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Whether the plugin considers itself healthy.
    pub healthy: bool,
    /// Optional detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthReport {
    /// A healthy report.
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: None,
        }
    }

    /// An unhealthy report with a reason.
    #[must_use]
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
        }
    }
}
