//! The first-generation plugin contracts.
//!
//! Still accepted so existing plugins keep working; see
//! [`adapters`](crate::adapters) for the bridges in both directions.

use async_trait::async_trait;

use drover_core::{Capabilities, Command, ExecuteRequest, ExecuteResponse, PluginDescriptor};

use crate::command_tree::CommandTree;
use crate::error::{SdkError, SdkResult};
use crate::io::SessionIo;
use crate::plugin::{HealthChecker, Initializer, Starter, Stopper};

/// A v1 out-of-process plugin with a fixed method surface.
#[async_trait]
pub trait LegacyPlugin: Send + Sync + 'static {
    /// Identity.
    fn metadata(&self) -> PluginDescriptor;

    /// Read configuration from wherever the plugin keeps it.
    async fn configure(&self) -> SdkResult<()> {
        Ok(())
    }

    /// Commands exposed to the CLI.
    fn list_commands(&self) -> Vec<Command>;

    /// Run a unary command.
    async fn execute_command(&self, request: ExecuteRequest) -> SdkResult<ExecuteResponse>;

    /// Run an interactive command, returning its exit code.
    async fn start_interactive(&self, _request: ExecuteRequest, _io: SessionIo) -> SdkResult<i32> {
        Err(SdkError::Unsupported("interactive mode"))
    }

    /// Capabilities the plugin needs.
    fn get_capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Init hook, if implemented.
    fn as_initializer(&self) -> Option<&dyn Initializer> {
        None
    }

    /// Start hook, if implemented.
    fn as_starter(&self) -> Option<&dyn Starter> {
        None
    }

    /// Stop hook, if implemented.
    fn as_stopper(&self) -> Option<&dyn Stopper> {
        None
    }

    /// Health hook, if implemented.
    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        None
    }
}

/// A v1 plugin compiled into the host, contributing commands to a tree.
pub trait InProcessPlugin: Send + Sync + 'static {
    /// Identity.
    fn metadata(&self) -> PluginDescriptor;

    /// Install commands under `root`.
    ///
    /// # Errors
    ///
    /// Fails if a command collides with one already in the tree.
    fn register(&self, root: &mut CommandTree) -> SdkResult<()>;
}
