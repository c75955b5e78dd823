//! Fixture plugin written against the v1 contract.

use async_trait::async_trait;
use drover_plugin_sdk::{
    Command, ExecuteRequest, ExecuteResponse, LegacyPlugin, PluginDescriptor, SdkError, SdkResult,
    serve_legacy,
};
use drover_telemetry::{LogConfig, setup_logging};

struct Legacy;

#[async_trait]
impl LegacyPlugin for Legacy {
    fn metadata(&self) -> PluginDescriptor {
        PluginDescriptor::new("legacy", "0.9.0").with_description("A first-generation plugin")
    }

    fn list_commands(&self) -> Vec<Command> {
        vec![Command::new("version").with_category("info")]
    }

    async fn execute_command(&self, request: ExecuteRequest) -> SdkResult<ExecuteResponse> {
        match request.command.as_str() {
            "version" => Ok(ExecuteResponse::ok("legacy 0.9.0\n")),
            other => Err(SdkError::UnknownCommand(other.to_string())),
        }
    }
}

#[tokio::main]
async fn main() -> SdkResult<()> {
    if let Err(e) = setup_logging(&LogConfig::for_plugin("warn")) {
        eprintln!("logging disabled: {e}");
    }
    serve_legacy(Legacy).await
}
