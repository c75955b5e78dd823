//! In-memory plugin fixtures for unit tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use drover_plugin_sdk::{
    Command, Context, ExecuteRequest, ExecuteResponse, HealthChecker, HealthReport, Initializer,
    Plugin, PluginDescriptor, SdkError, SdkResult, SessionIo, Starter, Stopper, serve_io,
};
use serde::Deserialize;
use tokio::io::{BufReader, DuplexStream, duplex};
use tokio::sync::Notify;

use drover_core::HandshakeConfig;

use crate::handshake::read_hello;
use crate::instance::Launched;
use crate::rpc::RpcClient;

#[derive(Default)]
struct Shared {
    prefix: Mutex<String>,
    hooks: Mutex<Vec<&'static str>>,
    cancelled: Notify,
}

#[derive(Deserialize)]
pub(crate) struct EchoConfig {
    prefix: String,
}

/// Echoes its arguments; records which hooks ran.
#[derive(Clone)]
pub(crate) struct EchoPlugin {
    name: String,
    aliases: Vec<String>,
    hooks_enabled: bool,
    fail_init: bool,
    min_sdk: Option<String>,
    shared: Arc<Shared>,
}

impl Default for EchoPlugin {
    fn default() -> Self {
        Self::named("echo")
    }
}

impl EchoPlugin {
    pub(crate) fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            hooks_enabled: true,
            fail_init: false,
            min_sdk: None,
            shared: Arc::default(),
        }
    }

    pub(crate) fn without_hooks() -> Self {
        Self {
            hooks_enabled: false,
            ..Self::default()
        }
    }

    pub(crate) fn with_alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub(crate) fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub(crate) fn requiring_sdk(mut self, version: &str) -> Self {
        self.min_sdk = Some(version.to_string());
        self
    }

    pub(crate) fn hooks(&self) -> Vec<&'static str> {
        self.shared.hooks.lock().unwrap().clone()
    }

    pub(crate) async fn wait_cancelled(&self) {
        self.shared.cancelled.notified().await;
    }

    fn record(&self, hook: &'static str) {
        self.shared.hooks.lock().unwrap().push(hook);
    }
}

#[async_trait]
impl Plugin for EchoPlugin {
    type Config = EchoConfig;

    fn metadata(&self) -> PluginDescriptor {
        let mut descriptor =
            PluginDescriptor::new(&self.name, "1.0.0").with_aliases(self.aliases.clone());
        if let Some(version) = &self.min_sdk {
            descriptor = descriptor.with_min_sdk_version(version);
        }
        descriptor
    }

    fn commands(&self) -> Vec<Command> {
        vec![
            Command::new("say").with_aliases(["s"]),
            Command::new("fail"),
            Command::new("repl").interactive(),
        ]
    }

    async fn configure(&self, _ctx: &Context, config: EchoConfig) -> SdkResult<()> {
        *self.shared.prefix.lock().unwrap() = config.prefix;
        Ok(())
    }

    async fn execute(&self, _ctx: &Context, request: ExecuteRequest) -> SdkResult<ExecuteResponse> {
        match request.command.as_str() {
            "say" => {
                let prefix = self.shared.prefix.lock().unwrap().clone();
                Ok(ExecuteResponse::ok(format!("{prefix}{}\n", request.args.join(" "))))
            },
            "fail" => Err(SdkError::failed("asked to fail")),
            other => Err(SdkError::UnknownCommand(other.to_string())),
        }
    }

    async fn interactive(
        &self,
        _ctx: &Context,
        _request: ExecuteRequest,
        mut io: SessionIo,
    ) -> SdkResult<i32> {
        io.write_stdout("ready\n").await?;
        loop {
            match io.read_line().await {
                Some(line) if line == "quit" => return Ok(0),
                Some(line) => io.write_stdout(format!("{line}\n")).await?,
                None => {
                    if io.is_cancelled() {
                        self.shared.cancelled.notify_one();
                    }
                    return Ok(130);
                },
            }
        }
    }

    fn as_initializer(&self) -> Option<&dyn Initializer> {
        self.hooks_enabled.then_some(self as &dyn Initializer)
    }

    fn as_starter(&self) -> Option<&dyn Starter> {
        self.hooks_enabled.then_some(self as &dyn Starter)
    }

    fn as_stopper(&self) -> Option<&dyn Stopper> {
        self.hooks_enabled.then_some(self as &dyn Stopper)
    }

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        self.hooks_enabled.then_some(self as &dyn HealthChecker)
    }
}

#[async_trait]
impl Initializer for EchoPlugin {
    async fn init(&self, _ctx: &Context) -> SdkResult<()> {
        if self.fail_init {
            return Err(SdkError::failed("init exploded"));
        }
        self.record("init");
        Ok(())
    }
}

#[async_trait]
impl Starter for EchoPlugin {
    async fn start(&self, _ctx: &Context) -> SdkResult<()> {
        self.record("start");
        Ok(())
    }
}

#[async_trait]
impl Stopper for EchoPlugin {
    async fn stop(&self, _ctx: &Context) -> SdkResult<()> {
        self.record("stop");
        Ok(())
    }
}

#[async_trait]
impl HealthChecker for EchoPlugin {
    async fn health_check(&self, _ctx: &Context) -> SdkResult<HealthReport> {
        Ok(HealthReport {
            healthy: true,
            message: Some("all good".into()),
        })
    }
}

/// Serve `plugin` over in-memory pipes and complete the handshake.
pub(crate) async fn connect<P: Plugin>(plugin: P) -> Launched {
    let (host_out, plugin_in) = duplex(64 * 1024);
    let (plugin_out, host_in) = duplex(64 * 1024);
    tokio::spawn(serve_io(plugin, plugin_in, plugin_out));

    let mut reader = BufReader::new(host_in);
    let hello = read_hello(
        &mut reader,
        &HandshakeConfig::default(),
        Duration::from_secs(5),
        "memory",
    )
    .await
    .unwrap();

    Launched {
        label: "memory".into(),
        path: PathBuf::from("memory"),
        rpc: RpcClient::spawn("memory", reader, host_out),
        process: None,
        hello,
        report: None,
    }
}

/// A handshaken connection whose far side never answers.
pub(crate) fn launched() -> (Launched, (DuplexStream, DuplexStream)) {
    let (host_out, plugin_in) = duplex(1024);
    let (plugin_out, host_in) = duplex(1024);
    let launched = Launched {
        label: "silent".into(),
        path: PathBuf::from("silent"),
        rpc: RpcClient::spawn("silent", BufReader::new(host_in), host_out),
        process: None,
        hello: HandshakeConfig::default().hello(drover_core::SDK_VERSION),
        report: None,
    };
    (launched, (plugin_in, plugin_out))
}
