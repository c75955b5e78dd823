//! Bridges between the v1 and v2 plugin contracts.

use std::sync::Arc;

use async_trait::async_trait;

use drover_core::{Capabilities, Command, ExecuteRequest, ExecuteResponse, PluginDescriptor};

use crate::command_tree::{CommandHandler, CommandTree};
use crate::context::Context;
use crate::error::SdkResult;
use crate::io::SessionIo;
use crate::legacy::{InProcessPlugin, LegacyPlugin};
use crate::plugin::{HealthChecker, Initializer, Plugin, Starter, Stopper};

/// Serves a [`LegacyPlugin`] as a v2 [`Plugin`].
///
/// Host configuration is accepted and ignored; the legacy `configure` is
/// called without it.
#[derive(Debug)]
pub struct LegacyAdapter<P> {
    inner: P,
}

impl<P: LegacyPlugin> LegacyAdapter<P> {
    /// Wrap a legacy plugin.
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    /// The wrapped plugin.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: LegacyPlugin> Plugin for LegacyAdapter<P> {
    type Config = serde_json::Value;

    fn metadata(&self) -> PluginDescriptor {
        self.inner.metadata()
    }

    fn commands(&self) -> Vec<Command> {
        self.inner.list_commands()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.get_capabilities()
    }

    async fn configure(&self, _ctx: &Context, _config: serde_json::Value) -> SdkResult<()> {
        self.inner.configure().await
    }

    async fn execute(&self, _ctx: &Context, request: ExecuteRequest) -> SdkResult<ExecuteResponse> {
        self.inner.execute_command(request).await
    }

    async fn interactive(
        &self,
        _ctx: &Context,
        request: ExecuteRequest,
        io: SessionIo,
    ) -> SdkResult<i32> {
        self.inner.start_interactive(request, io).await
    }

    fn as_initializer(&self) -> Option<&dyn Initializer> {
        self.inner.as_initializer()
    }

    fn as_starter(&self) -> Option<&dyn Starter> {
        self.inner.as_starter()
    }

    fn as_stopper(&self) -> Option<&dyn Stopper> {
        self.inner.as_stopper()
    }

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        self.inner.as_health_checker()
    }
}

/// Presents an [`InProcessPlugin`] as a v2 [`Plugin`].
///
/// In-process commands live in a [`CommandTree`] owned by the caller, not
/// in the plugin protocol: `commands()` is empty and `execute` always
/// answers with a failed response. Use [`register`](InProcessPlugin::register)
/// to reach them.
#[derive(Debug)]
pub struct InProcessAdapter<P> {
    inner: P,
}

impl<P: InProcessPlugin> InProcessAdapter<P> {
    /// Wrap an in-process plugin.
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: InProcessPlugin> Plugin for InProcessAdapter<P> {
    type Config = serde_json::Value;

    fn metadata(&self) -> PluginDescriptor {
        self.inner.metadata()
    }

    fn commands(&self) -> Vec<Command> {
        Vec::new()
    }

    async fn execute(&self, _ctx: &Context, request: ExecuteRequest) -> SdkResult<ExecuteResponse> {
        Ok(ExecuteResponse::failure(
            1,
            format!(
                "command '{}' is only reachable through the in-process command tree",
                request.command
            ),
        ))
    }
}

impl<P: InProcessPlugin> InProcessPlugin for InProcessAdapter<P> {
    fn metadata(&self) -> PluginDescriptor {
        self.inner.metadata()
    }

    fn register(&self, root: &mut CommandTree) -> SdkResult<()> {
        self.inner.register(root)
    }
}

/// Presents a v2 [`Plugin`] through the v1 contracts.
///
/// The plugin is assumed to be configured already, so the legacy
/// `configure` does nothing.
#[derive(Debug)]
pub struct ModernAdapter<P> {
    inner: Arc<P>,
}

impl<P: Plugin> ModernAdapter<P> {
    /// Wrap a v2 plugin.
    pub fn new(inner: P) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    fn context(&self) -> Context {
        Context::new(self.inner.metadata().name)
    }
}

#[async_trait]
impl<P: Plugin> LegacyPlugin for ModernAdapter<P> {
    fn metadata(&self) -> PluginDescriptor {
        self.inner.metadata()
    }

    fn list_commands(&self) -> Vec<Command> {
        self.inner.commands()
    }

    async fn execute_command(&self, request: ExecuteRequest) -> SdkResult<ExecuteResponse> {
        self.inner.execute(&self.context(), request).await
    }

    async fn start_interactive(&self, request: ExecuteRequest, io: SessionIo) -> SdkResult<i32> {
        self.inner.interactive(&self.context(), request, io).await
    }

    fn get_capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn as_initializer(&self) -> Option<&dyn Initializer> {
        self.inner.as_initializer()
    }

    fn as_starter(&self) -> Option<&dyn Starter> {
        self.inner.as_starter()
    }

    fn as_stopper(&self) -> Option<&dyn Stopper> {
        self.inner.as_stopper()
    }

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        self.inner.as_health_checker()
    }
}

impl<P: Plugin> InProcessPlugin for ModernAdapter<P> {
    fn metadata(&self) -> PluginDescriptor {
        self.inner.metadata()
    }

    fn register(&self, root: &mut CommandTree) -> SdkResult<()> {
        for command in self.inner.commands() {
            let handler = ExecuteHandler {
                plugin: Arc::clone(&self.inner),
            };
            root.add(command, Arc::new(handler))?;
        }
        Ok(())
    }
}

struct ExecuteHandler<P> {
    plugin: Arc<P>,
}

#[async_trait]
impl<P: Plugin> CommandHandler for ExecuteHandler<P> {
    async fn run(&self, ctx: &Context, request: ExecuteRequest) -> SdkResult<ExecuteResponse> {
        self.plugin.execute(ctx, request).await
    }
}
