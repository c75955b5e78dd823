//! Shared vocabulary between the Drover host and out-of-process plugins.
//!
//! Everything that crosses the process boundary lives here so that the host
//! runtime (`drover-plugins`) and the plugin SDK (`drover-plugin-sdk`) agree
//! on a single serialization format:
//!
//! - [`PluginDescriptor`], [`Command`], [`Capabilities`]: what a plugin is
//!   and what it needs
//! - [`ExecuteRequest`] / [`ExecuteResponse`]: unary command execution
//! - [`StreamMessage`]: interactive session traffic
//! - [`protocol`]: handshake constants and the newline-delimited [`Frame`]
//!   wire format
//! - [`Registry`]: the thread-safe, alias-aware name table reused for the
//!   plugin table, per-plugin command tables and the SDK command tree

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod descriptor;
pub mod error;
pub mod exec;
pub mod protocol;
pub mod registry;
pub mod version;

pub use descriptor::{Capabilities, Command, PluginDescriptor, validate_plugin_name};
pub use error::{InvalidName, RegistryError, RegistryResult};
pub use exec::{ExecuteRequest, ExecuteResponse, StreamMessage};
pub use protocol::{
    FaultCode, Frame, HandshakeConfig, HandshakeMismatch, HealthReport, Hello, MetadataResponse,
    Method, Outcome, RpcFault,
};
pub use registry::Registry;
pub use version::{SDK_VERSION, Version, VersionParseError};
