//! SDK for writing Drover plugins.
//!
//! A plugin is a standalone executable. Drover launches it with piped stdio,
//! the plugin answers a handshake on stdout, and from then on the two sides
//! exchange newline-delimited JSON frames. This crate hides all of that:
//! implement [`Plugin`] and hand it to [`serve`].
//!
//! ```no_run
//! use drover_plugin_sdk::{
//!     Command, Context, ExecuteRequest, ExecuteResponse, Plugin, PluginDescriptor, SdkResult,
//!     async_trait, serve,
//! };
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Plugin for Hello {
//!     type Config = ();
//!
//!     fn metadata(&self) -> PluginDescriptor {
//!         PluginDescriptor::new("hello", "1.0.0")
//!     }
//!
//!     fn commands(&self) -> Vec<Command> {
//!         vec![Command::new("hello")]
//!     }
//!
//!     async fn execute(&self, _ctx: &Context, _req: ExecuteRequest) -> SdkResult<ExecuteResponse> {
//!         Ok(ExecuteResponse::ok("Hello, World!\n"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> SdkResult<()> {
//!     serve(Hello).await
//! }
//! ```
//!
//! Plugins written against the first-generation contracts
//! ([`LegacyPlugin`], [`InProcessPlugin`]) are served through the
//! [`adapters`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
mod command_tree;
mod context;
mod error;
mod io;
mod legacy;
mod plugin;
mod server;

pub use adapters::{InProcessAdapter, LegacyAdapter, ModernAdapter};
pub use command_tree::{CommandHandler, CommandTree};
pub use context::Context;
pub use error::{SdkError, SdkResult};
pub use io::SessionIo;
pub use legacy::{InProcessPlugin, LegacyPlugin};
pub use plugin::{HealthChecker, Initializer, Plugin, Starter, Stopper};
pub use server::{serve, serve_io, serve_legacy};

pub use async_trait::async_trait;
pub use drover_core::{
    Capabilities, Command, ExecuteRequest, ExecuteResponse, HealthReport, PluginDescriptor,
    SDK_VERSION, StreamMessage,
};
