//! Fixture plugin: greets, and chats interactively.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use drover_plugin_sdk::{
    Command, Context, ExecuteRequest, ExecuteResponse, HealthChecker, HealthReport, Initializer,
    Plugin, PluginDescriptor, SdkError, SdkResult, SessionIo, Starter, Stopper, serve,
};
use drover_telemetry::{LogConfig, setup_logging};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HelloConfig {
    greeting: Option<String>,
    fail_on_stop: bool,
}

#[derive(Default)]
struct HelloPlugin {
    config: Mutex<HelloConfig>,
}

impl HelloPlugin {
    fn greeting(&self) -> String {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .greeting
            .clone()
            .unwrap_or_else(|| "Hello".to_string())
    }
}

#[async_trait]
impl Plugin for HelloPlugin {
    type Config = HelloConfig;

    fn metadata(&self) -> PluginDescriptor {
        PluginDescriptor::new("hello", "1.0.0")
            .with_description("Says hello")
            .with_author("Drover Team")
            .with_aliases(["hi"])
    }

    fn commands(&self) -> Vec<Command> {
        vec![
            Command::new("hello")
                .with_category("demo")
                .with_description("Print a greeting")
                .with_aliases(["hey"]),
            Command::new("greet")
                .with_category("demo")
                .with_usage("greet <name>"),
            Command::new("chat")
                .with_category("demo")
                .with_description("Talk to the plugin")
                .interactive(),
        ]
    }

    async fn configure(&self, _ctx: &Context, config: HelloConfig) -> SdkResult<()> {
        info!(?config, "configured");
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    async fn execute(&self, _ctx: &Context, request: ExecuteRequest) -> SdkResult<ExecuteResponse> {
        let greeting = self.greeting();
        match request.command.as_str() {
            "hello" => Ok(ExecuteResponse::ok(format!("{greeting}, World!\n"))),
            "greet" => match request.args.first() {
                Some(name) => Ok(ExecuteResponse::ok(format!("{greeting}, {name}!\n"))),
                None => Ok(ExecuteResponse::failure(1, "greet needs a name")),
            },
            other => Err(SdkError::UnknownCommand(other.to_string())),
        }
    }

    async fn interactive(
        &self,
        _ctx: &Context,
        _request: ExecuteRequest,
        mut io: SessionIo,
    ) -> SdkResult<i32> {
        io.write_stdout("Welcome to interactive mode\n").await?;
        loop {
            io.write_stdout("> ").await?;
            match io.read_line().await {
                Some(line) if line.trim() == "exit" => {
                    io.write_stdout("Goodbye!\n").await?;
                    return Ok(0);
                },
                Some(line) => io.write_stdout(format!("You said: {line}\n")).await?,
                None => return Ok(130),
            }
        }
    }

    fn as_initializer(&self) -> Option<&dyn Initializer> {
        Some(self)
    }

    fn as_starter(&self) -> Option<&dyn Starter> {
        Some(self)
    }

    fn as_stopper(&self) -> Option<&dyn Stopper> {
        Some(self)
    }

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self)
    }
}

#[async_trait]
impl Initializer for HelloPlugin {
    async fn init(&self, _ctx: &Context) -> SdkResult<()> {
        info!("init");
        Ok(())
    }
}

#[async_trait]
impl Starter for HelloPlugin {
    async fn start(&self, _ctx: &Context) -> SdkResult<()> {
        info!("start");
        Ok(())
    }
}

#[async_trait]
impl Stopper for HelloPlugin {
    async fn stop(&self, _ctx: &Context) -> SdkResult<()> {
        if self
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_stop
        {
            return Err(SdkError::failed("refusing to stop"));
        }
        info!("stop");
        Ok(())
    }
}

#[async_trait]
impl HealthChecker for HelloPlugin {
    async fn health_check(&self, _ctx: &Context) -> SdkResult<HealthReport> {
        Ok(HealthReport::healthy())
    }
}

#[tokio::main]
async fn main() -> SdkResult<()> {
    let level = std::env::var("DROVER_PLUGIN_LOG").unwrap_or_else(|_| "info".to_string());
    if let Err(e) = setup_logging(&LogConfig::for_plugin(level)) {
        eprintln!("logging disabled: {e}");
    }
    serve(HelloPlugin::default()).await
}
