//! Process-isolated plugin runtime for Drover.
//!
//! Plugins are standalone executables. Before one is launched the
//! [`SecurityValidator`] checks its permissions, owner, checksum, binary
//! format and declared capabilities. The [`PluginManager`] then spawns it
//! with piped stdio, verifies the handshake, fetches its metadata and drives
//! its lifecycle over a multiplexed JSON-lines RPC connection.
//!
//! ```text
//!  PluginManager ──► SecurityValidator ──► PluginProcess (tokio::process)
//!        │                                        │ stdin/stdout
//!        ▼                                        ▼
//!  Registry<Arc<PluginInstance>> ──► RpcClient ◄──► plugin (drover-plugin-sdk)
//!        │
//!        └─► CommandRegistry, Lifecycle, InteractiveSession
//! ```
//!
//! # Example
//!
//! ```no_run
//! use drover_plugins::{HostConfig, PluginManager};
//!
//! # async fn run() -> drover_plugins::PluginResult<()> {
//! let manager = PluginManager::new(HostConfig::default());
//! manager.load("/opt/drover/plugins/hello/hello-plugin").await?;
//!
//! let response = manager
//!     .execute_command("hello", "hello", vec![], Default::default())
//!     .await?;
//! print!("{}", response.stdout_text());
//!
//! manager.cleanup().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod capabilities;
pub mod commands;
pub mod config;
pub mod error;
pub mod handshake;
pub mod instance;
pub mod lifecycle;
pub mod manager;
pub mod manifest;
pub mod process;
pub mod rpc;
pub mod security;
pub mod session;

#[cfg(test)]
mod test_support;

pub use capabilities::{CapabilityPolicy, CapabilityValidator, CapabilityViolation};
pub use commands::{CommandRegistry, ResolvedCommand};
pub use config::{HostConfig, SecurityConfig};
pub use error::{PluginError, PluginResult, ValidationStep};
pub use instance::{HealthStatus, PluginInstance};
pub use lifecycle::{Lifecycle, LifecycleAction, PluginState};
pub use manager::{CleanupReport, LoadOptions, PluginManager};
pub use manifest::PluginManifest;
pub use rpc::{RpcClient, RpcError};
pub use security::{BinaryFormat, SecurityValidator, ValidationReport};
pub use session::{InteractiveSession, SessionOutput};
