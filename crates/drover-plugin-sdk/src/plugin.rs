//! The plugin contract.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use drover_core::{
    Capabilities, Command, ExecuteRequest, ExecuteResponse, HealthReport, PluginDescriptor,
};

use crate::context::Context;
use crate::error::{SdkError, SdkResult};
use crate::io::SessionIo;

/// A Drover plugin.
///
/// Only metadata, the command list and execution are required. Lifecycle
/// hooks are optional: implement [`Initializer`], [`Starter`], [`Stopper`]
/// or [`HealthChecker`] and return `Some(self)` from the matching `as_*`
/// accessor. The host treats a missing hook as a no-op.
///
/// Calls arrive concurrently, so state behind `&self` needs interior
/// mutability.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Configuration the host hands to [`configure`](Self::configure).
    type Config: DeserializeOwned + Send;

    /// Identity.
    fn metadata(&self) -> PluginDescriptor;

    /// Commands exposed to the CLI.
    fn commands(&self) -> Vec<Command>;

    /// Capabilities the plugin needs.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Accept configuration. Called at most once, before `init`.
    async fn configure(&self, _ctx: &Context, _config: Self::Config) -> SdkResult<()> {
        Ok(())
    }

    /// Run a unary command.
    ///
    /// Return [`SdkError::UnknownCommand`] for commands the plugin does not
    /// know. Any other error becomes a failed [`ExecuteResponse`].
    async fn execute(&self, ctx: &Context, request: ExecuteRequest) -> SdkResult<ExecuteResponse>;

    /// Run an interactive command to completion, returning its exit code.
    async fn interactive(
        &self,
        _ctx: &Context,
        _request: ExecuteRequest,
        _io: SessionIo,
    ) -> SdkResult<i32> {
        Err(SdkError::Unsupported("interactive mode"))
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

/// Runs once after configuration.
#[async_trait]
pub trait Initializer: Send + Sync {
    /// Prepare resources.
    async fn init(&self, ctx: &Context) -> SdkResult<()>;
}

/// Runs when the host starts the plugin.
#[async_trait]
pub trait Starter: Send + Sync {
    /// Begin work.
    async fn start(&self, ctx: &Context) -> SdkResult<()>;
}

/// Runs when the host stops the plugin.
#[async_trait]
pub trait Stopper: Send + Sync {
    /// Release resources.
    async fn stop(&self, ctx: &Context) -> SdkResult<()>;
}

/// Answers host health checks.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Report health.
    async fn health_check(&self, ctx: &Context) -> SdkResult<HealthReport>;
}
