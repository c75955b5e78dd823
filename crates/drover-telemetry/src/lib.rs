//! Drover Telemetry - logging setup for the host and for plugin processes.
//!
//! Library crates in the workspace only emit `tracing` events; binaries call
//! [`setup_logging`] once at startup.
//!
//! Plugin processes must keep stdout free for protocol frames, so they
//! should start from [`LogConfig::for_plugin`], which always writes to
//! stderr.
//!
//! # Example
//!
//! ```rust,no_run
//! use drover_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), drover_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("drover_plugins=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!(plugin = "hello", "loaded");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
