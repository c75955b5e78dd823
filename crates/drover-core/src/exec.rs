//! Command execution payloads.
//!
//! Byte payloads travel as base64 strings so that arbitrary process output
//! survives the JSON wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A unary command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteRequest {
    /// Command name as declared by the plugin (aliases are resolved by the host).
    pub command: String,
    /// Positional arguments.
    pub args: Vec<String>,
    /// Named flags.
    pub flags: BTreeMap<String, String>,
}

impl ExecuteRequest {
    /// A request with positional arguments and no flags.
    #[must_use]
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            flags: BTreeMap::new(),
        }
    }

    /// Add a named flag.
    #[must_use]
    pub fn with_flag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }
}

/// Result of a unary command.
///
/// `success == false` is an ordinary outcome reported by the plugin, not a
/// transport failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteResponse {
    /// Whether the command did what was asked.
    pub success: bool,
    /// Process-style exit code.
    pub exit_code: i32,
    /// Captured standard output.
    #[serde(with = "base64_bytes")]
    pub stdout: Vec<u8>,
    /// Captured standard error.
    #[serde(with = "base64_bytes")]
    pub stderr: Vec<u8>,
    /// Human-readable failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecuteResponse {
    /// A successful response with exit code 0.
    #[must_use]
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            success: true,
            exit_code: 0,
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// A failed response. The message is also written to `stderr`.
    #[must_use]
    pub fn failure(exit_code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            exit_code,
            stdout: Vec::new(),
            stderr: format!("{message}\n").into_bytes(),
            error: Some(message),
        }
    }

    /// Replace captured standard error.
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<Vec<u8>>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Standard output decoded lossily as UTF-8.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// One message of an interactive session.
///
/// `Stdin` flows host → plugin; the rest flow plugin → host. `Exit` ends
/// the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Input for the plugin.
    Stdin(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Output from the plugin.
    Stdout(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Diagnostic output from the plugin.
    Stderr(#[serde(with = "base64_bytes")] Vec<u8>),
    /// The session finished.
    Exit {
        /// Exit code of the session.
        code: i32,
    },
}

impl StreamMessage {
    /// Shorthand for [`StreamMessage::Stdin`].
    #[must_use]
    pub fn stdin(data: impl Into<Vec<u8>>) -> Self {
        Self::Stdin(data.into())
    }

    /// Shorthand for [`StreamMessage::Stdout`].
    #[must_use]
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Self::Stdout(data.into())
    }

    /// Shorthand for [`StreamMessage::Stderr`].
    #[must_use]
    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        Self::Stderr(data.into())
    }

    /// Whether this message ends the session.
    #[must_use]
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exit { .. })
    }

    /// The byte payload, if any.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Stdin(data) | Self::Stdout(data) | Self::Stderr(data) => Some(data),
            Self::Exit { .. } => None,
        }
    }
}

/// Serde adapter encoding `Vec<u8>` as a standard base64 string.
pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as base64.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserialize bytes from base64.
    ///
    /// # Errors
    ///
    /// Fails if the input is not a valid base64 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
