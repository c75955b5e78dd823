//! A loaded, handshaken plugin.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use drover_core::{
    Capabilities, ExecuteRequest, ExecuteResponse, FaultCode, HealthReport, Hello,
    MetadataResponse, Method, PluginDescriptor, Version, validate_plugin_name,
};

use crate::commands::CommandRegistry;
use crate::error::{PluginError, PluginResult};
use crate::lifecycle::{Lifecycle, LifecycleAction, PluginState};
use crate::process::PluginProcess;
use crate::rpc::{RpcClient, RpcError};
use crate::security::ValidationReport;
use crate::session::InteractiveSession;

/// A connection that has passed the handshake but not yet described itself.
pub(crate) struct Launched {
    pub(crate) label: String,
    pub(crate) path: PathBuf,
    pub(crate) rpc: RpcClient,
    pub(crate) process: Option<PluginProcess>,
    pub(crate) hello: Hello,
    pub(crate) report: Option<ValidationReport>,
}

impl Launched {
    /// Tear the connection down without running any hooks.
    pub(crate) async fn abort(self) {
        self.rpc.close();
        if let Some(mut process) = self.process {
            if let Err(e) = process.kill().await {
                warn!(plugin = %self.label, error = %e, "failed to kill plugin process");
            }
        }
    }
}

/// Point-in-time health of one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Plugin name.
    pub plugin: String,
    /// Lifecycle state at the time of the check.
    #[serde(serialize_with = "serialize_state")]
    pub state: PluginState,
    /// Whether the OS process is still running.
    pub process_alive: bool,
    /// Overall verdict.
    pub healthy: bool,
    /// Detail from the plugin or the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn serialize_state<S: serde::Serializer>(state: &PluginState, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(state)
}

/// A plugin that has launched, handshaken and described itself.
///
/// Descriptor, command table and capabilities are fixed at load. All calls
/// go through the shared RPC connection; the instance can be used from many
/// tasks at once.
#[derive(Debug)]
pub struct PluginInstance {
    descriptor: PluginDescriptor,
    capabilities: Capabilities,
    commands: CommandRegistry,
    lifecycle: Lifecycle,
    rpc: RpcClient,
    process: Mutex<Option<PluginProcess>>,
    path: PathBuf,
    sdk_version: String,
    report: Option<ValidationReport>,
}

impl PluginInstance {
    /// Fetch and check metadata, producing an instance in
    /// [`PluginState::Uninitialized`].
    ///
    /// On failure the connection is torn down before returning.
    pub(crate) async fn describe(launched: Launched, timeout: Duration) -> PluginResult<Self> {
        let metadata = match fetch_metadata(&launched, timeout).await {
            Ok(metadata) => metadata,
            Err(e) => {
                launched.abort().await;
                return Err(e);
            },
        };

        let MetadataResponse {
            descriptor,
            commands,
            capabilities,
        } = metadata;

        let checked = check_descriptor(&launched.label, &descriptor)
            .and_then(|()| CommandRegistry::from_commands(&descriptor.name, commands));
        let commands = match checked {
            Ok(commands) => commands,
            Err(e) => {
                launched.abort().await;
                return Err(e);
            },
        };

        debug!(
            plugin = %descriptor.name,
            version = %descriptor.version,
            sdk_version = %launched.hello.sdk_version,
            commands = commands.len(),
            "plugin described itself"
        );

        Ok(Self {
            lifecycle: Lifecycle::new(descriptor.name.clone()),
            descriptor,
            capabilities,
            commands,
            rpc: launched.rpc,
            process: Mutex::new(launched.process),
            path: launched.path,
            sdk_version: launched.hello.sdk_version,
            report: launched.report,
        })
    }

    /// Canonical plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Identity reported at load.
    #[must_use]
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Capabilities reported at load.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Command table reported at load.
    #[must_use]
    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PluginState {
        self.lifecycle.state()
    }

    /// Executable path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// SDK version the plugin announced in its handshake.
    #[must_use]
    pub fn sdk_version(&self) -> &str {
        &self.sdk_version
    }

    /// What the security validator found, for process-backed plugins.
    #[must_use]
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        self.report.as_ref()
    }

    /// OS process id, while running.
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(PluginProcess::pid)
    }

    /// Whether the plugin process is still running.
    pub async fn is_process_alive(&self) -> bool {
        match self.process.lock().await.as_mut() {
            Some(process) => process.is_alive(),
            None => !self.rpc.is_closed(),
        }
    }

    /// Hand configuration to the plugin. Only allowed before `init`.
    ///
    /// # Errors
    ///
    /// [`PluginError::InvalidTransition`] after `init`;
    /// [`PluginError::Lifecycle`] if the plugin rejects the configuration.
    pub async fn configure(&self, config: Value) -> PluginResult<()> {
        self.lifecycle.check(LifecycleAction::Configure)?;
        self.call_hook(Method::Configure { config }).await?;
        Ok(())
    }

    /// Run the init hook and move to [`PluginState::Initialized`].
    ///
    /// # Errors
    ///
    /// [`PluginError::InvalidTransition`] unless uninitialized;
    /// [`PluginError::Lifecycle`] if the hook fails, leaving the state as is.
    pub async fn init(&self) -> PluginResult<()> {
        self.advance(LifecycleAction::Init, Method::Init).await
    }

    /// Run the start hook and move to [`PluginState::Started`].
    ///
    /// # Errors
    ///
    /// [`PluginError::InvalidTransition`] unless initialized;
    /// [`PluginError::Lifecycle`] if the hook fails.
    pub async fn start(&self) -> PluginResult<()> {
        self.advance(LifecycleAction::Start, Method::Start).await
    }

    /// Move to [`PluginState::Stopped`] and run the stop hook.
    ///
    /// The process keeps running until [`shutdown`](Self::shutdown); it just
    /// accepts no more commands.
    ///
    /// # Errors
    ///
    /// [`PluginError::InvalidTransition`] if already stopped;
    /// [`PluginError::Lifecycle`] if the hook fails. The state is
    /// `Stopped` either way.
    pub async fn stop(&self) -> PluginResult<()> {
        self.lifecycle.transition(LifecycleAction::Stop)?;
        self.call_hook(Method::Stop).await?;
        info!(plugin = %self.name(), "plugin stopped");
        Ok(())
    }

    /// Ask the plugin how it is doing.
    ///
    /// Never fails: transport errors and faults are reported as unhealthy.
    /// A plugin without a health hook is healthy while its process runs.
    pub async fn health_check(&self) -> HealthStatus {
        let state = self.state();
        let process_alive = self.is_process_alive().await;
        let (healthy, message) = if state == PluginState::Stopped {
            (false, Some("plugin is stopped".to_string()))
        } else if !process_alive {
            (false, Some("plugin process is not running".to_string()))
        } else {
            match self.rpc.call_as::<HealthReport>(Method::HealthCheck).await {
                Ok(report) => (report.healthy, report.message),
                Err(RpcError::Fault(f)) if f.is_unimplemented() => (true, None),
                Err(e) => (false, Some(e.to_string())),
            }
        };
        HealthStatus {
            plugin: self.name().to_string(),
            state,
            process_alive,
            healthy,
            message,
        }
    }

    /// Run a unary command.
    ///
    /// A command that runs and fails comes back as `Ok` with
    /// `success == false`.
    ///
    /// # Errors
    ///
    /// [`PluginError::Stopped`] after stop;
    /// [`PluginError::CommandNotFound`] if the plugin does not know it;
    /// [`PluginError::Rpc`] on transport failure.
    pub async fn execute(&self, request: ExecuteRequest) -> PluginResult<ExecuteResponse> {
        self.ensure_running()?;
        let command = request.command.clone();
        debug!(plugin = %self.name(), command = %command, "executing command");
        self.rpc
            .call_as(Method::Execute { request })
            .await
            .map_err(|e| self.call_error(e, &command))
    }

    /// Start an interactive command.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub async fn start_interactive(
        &self,
        request: ExecuteRequest,
    ) -> PluginResult<InteractiveSession> {
        self.ensure_running()?;
        let command = request.command.clone();
        let (session, inbound) = self
            .rpc
            .open_session()
            .map_err(|e| self.call_error(e, &command))?;
        match self
            .rpc
            .call(Method::StartInteractive { session, request })
            .await
        {
            Ok(_) => {
                debug!(plugin = %self.name(), command = %command, session, "interactive session started");
                Ok(InteractiveSession::new(
                    self.name(),
                    session,
                    self.rpc.clone(),
                    inbound,
                ))
            },
            Err(e) => {
                self.rpc.close_session(session, false).await;
                Err(self.call_error(e, &command))
            },
        }
    }

    /// Stop the plugin and terminate its process.
    ///
    /// The state becomes `Stopped` first, so no new calls are accepted. The
    /// stop hook runs if the plugin was not already stopped, bounded by
    /// `grace`. Stdin is then closed and the process gets `grace` to exit
    /// before it is killed. The process is terminated even when the hook
    /// fails; the hook error is returned afterwards.
    ///
    /// # Errors
    ///
    /// The stop hook's error, or a failure to reap the process.
    pub async fn shutdown(&self, grace: Duration) -> PluginResult<()> {
        let previous = self.lifecycle.mark_stopped();
        let mut result = Ok(());

        if previous != PluginState::Stopped && !self.rpc.is_closed() {
            match tokio::time::timeout(grace, self.call_hook(Method::Stop)).await {
                Ok(Ok(_)) => {},
                Ok(Err(e)) => {
                    warn!(plugin = %self.name(), error = %e, "stop hook failed during shutdown");
                    result = Err(e);
                },
                Err(_) => warn!(plugin = %self.name(), "stop hook timed out during shutdown"),
            }
        }

        self.rpc.close();

        let process = self.process.lock().await.take();
        if let Some(mut process) = process {
            if let Err(e) = process.shutdown(grace).await {
                warn!(plugin = %self.name(), error = %e, "failed to reap plugin process");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        info!(plugin = %self.name(), from = %previous, "plugin shut down");
        result
    }

    /// Kill without running hooks. Used when a load fails after describe.
    pub(crate) async fn abort(&self) {
        self.lifecycle.mark_stopped();
        self.rpc.close();
        let process = self.process.lock().await.take();
        if let Some(mut process) = process {
            if let Err(e) = process.kill().await {
                warn!(plugin = %self.name(), error = %e, "failed to kill plugin process");
            }
        }
    }

    async fn advance(&self, action: LifecycleAction, method: Method) -> PluginResult<()> {
        self.lifecycle.check(action)?;
        self.call_hook(method).await?;
        let state = self.lifecycle.transition(action)?;
        debug!(plugin = %self.name(), %state, "lifecycle advanced");
        Ok(())
    }

    /// Call a lifecycle hook. Returns `false` if the plugin does not
    /// implement it.
    async fn call_hook(&self, method: Method) -> PluginResult<bool> {
        let hook = method.name();
        match self.rpc.call(method).await {
            Ok(_) => Ok(true),
            Err(RpcError::Fault(fault)) if fault.is_unimplemented() => {
                debug!(plugin = %self.name(), hook, "hook not implemented, skipping");
                Ok(false)
            },
            Err(RpcError::Fault(fault)) => Err(PluginError::Lifecycle {
                plugin: self.name().to_string(),
                hook,
                message: fault.message,
            }),
            Err(e) => Err(self.rpc_error(e)),
        }
    }

    fn ensure_running(&self) -> PluginResult<()> {
        if self.lifecycle.is_stopped() {
            return Err(PluginError::Stopped(self.name().to_string()));
        }
        Ok(())
    }

    fn call_error(&self, e: RpcError, command: &str) -> PluginError {
        match e {
            RpcError::Fault(fault) if fault.code == FaultCode::UnknownCommand => {
                PluginError::CommandNotFound {
                    plugin: self.name().to_string(),
                    command: command.to_string(),
                }
            },
            other => self.rpc_error(other),
        }
    }

    fn rpc_error(&self, source: RpcError) -> PluginError {
        PluginError::Rpc {
            plugin: self.name().to_string(),
            source,
        }
    }
}

async fn fetch_metadata(launched: &Launched, timeout: Duration) -> PluginResult<MetadataResponse> {
    let call = launched.rpc.call_as::<MetadataResponse>(Method::GetMetadata);
    match tokio::time::timeout(timeout, call).await {
        Err(_) => Err(PluginError::Launch {
            plugin: launched.label.clone(),
            message: format!("no metadata within {}s", timeout.as_secs_f64()),
        }),
        Ok(Err(RpcError::Closed)) => Err(PluginError::Launch {
            plugin: launched.label.clone(),
            message: "process exited before describing itself".into(),
        }),
        Ok(Err(e)) => Err(PluginError::Handshake {
            plugin: launched.label.clone(),
            message: format!("metadata request failed: {e}"),
        }),
        Ok(Ok(metadata)) => Ok(metadata),
    }
}

fn check_descriptor(label: &str, descriptor: &PluginDescriptor) -> PluginResult<()> {
    let reject = |message: String| PluginError::Handshake {
        plugin: label.to_string(),
        message,
    };

    validate_plugin_name(&descriptor.name).map_err(|e| reject(e.to_string()))?;
    for alias in &descriptor.aliases {
        validate_plugin_name(alias).map_err(|e| reject(format!("alias: {e}")))?;
    }

    if let Some(required) = descriptor.min_sdk_version.as_deref() {
        let required: Version = required
            .parse()
            .map_err(|e| reject(format!("bad minSdkVersion '{required}': {e}")))?;
        let host = Version::sdk();
        if !host.satisfies(&required) {
            return Err(reject(format!(
                "plugin requires SDK {required} or newer within the same major, host has {host}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EchoPlugin, connect, launched};
    use drover_core::StreamMessage;

    async fn described() -> PluginInstance {
        PluginInstance::describe(connect(EchoPlugin::default()).await, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn describes_and_walks_the_lifecycle() {
        let plugin = EchoPlugin::default();
        let spy = plugin.clone();
        let inst = PluginInstance::describe(connect(plugin).await, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(inst.name(), "echo");
        assert_eq!(inst.sdk_version(), drover_core::SDK_VERSION);
        assert!(inst.commands().get("say").is_some());
        assert_eq!(inst.state(), PluginState::Uninitialized);

        inst.configure(serde_json::json!({"prefix": ">> "})).await.unwrap();
        inst.init().await.unwrap();
        inst.start().await.unwrap();
        assert_eq!(inst.state(), PluginState::Started);

        let resp = inst
            .execute(ExecuteRequest::new("say", ["hi"]))
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.stdout_text(), ">> hi\n");

        inst.stop().await.unwrap();
        assert_eq!(spy.hooks(), vec!["init", "start", "stop"]);
        assert!(matches!(
            inst.execute(ExecuteRequest::new("say", ["hi"])).await,
            Err(PluginError::Stopped(_))
        ));
    }

    #[tokio::test]
    async fn start_before_init_does_not_reach_the_plugin() {
        let plugin = EchoPlugin::default();
        let spy = plugin.clone();
        let inst = PluginInstance::describe(connect(plugin).await, Duration::from_secs(5))
            .await
            .unwrap();
        let err = inst.start().await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidTransition { .. }));
        assert_eq!(inst.state(), PluginState::Uninitialized);
        assert!(spy.hooks().is_empty());
    }

    #[tokio::test]
    async fn missing_hooks_are_no_ops() {
        let inst = PluginInstance::describe(
            connect(EchoPlugin::without_hooks()).await,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        inst.init().await.unwrap();
        inst.start().await.unwrap();
        let health = inst.health_check().await;
        assert!(health.healthy);
        assert!(health.message.is_none());
        inst.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failing_init_keeps_state() {
        let inst = PluginInstance::describe(
            connect(EchoPlugin::default().failing_init()).await,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let err = inst.init().await.unwrap_err();
        assert!(matches!(err, PluginError::Lifecycle { hook: "init", .. }));
        assert_eq!(inst.state(), PluginState::Uninitialized);
    }

    #[tokio::test]
    async fn configure_after_init_is_rejected() {
        let inst = described().await;
        inst.init().await.unwrap();
        assert!(matches!(
            inst.configure(Value::Null).await,
            Err(PluginError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn bad_config_is_a_lifecycle_error() {
        let inst = described().await;
        let err = inst
            .configure(serde_json::json!({"prefix": 42}))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Lifecycle { hook: "configure", .. }));
    }

    #[tokio::test]
    async fn health_reports_plugin_verdict() {
        let inst = described().await;
        let status = inst.health_check().await;
        assert!(status.healthy);
        assert!(status.process_alive);
        assert_eq!(status.state, PluginState::Uninitialized);
        assert_eq!(status.message.as_deref(), Some("all good"));
    }

    #[tokio::test]
    async fn unknown_command_maps_to_command_not_found() {
        let inst = described().await;
        let err = inst
            .execute(ExecuteRequest::new("nope", Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::CommandNotFound { ref command, .. } if command == "nope"));
    }

    #[tokio::test]
    async fn command_failure_is_a_response_not_an_error() {
        let inst = described().await;
        let resp = inst
            .execute(ExecuteRequest::new("fail", Vec::<String>::new()))
            .await
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.exit_code, 1);
        assert!(resp.error.unwrap().contains("asked to fail"));
    }

    #[tokio::test]
    async fn interactive_round_trip() {
        let inst = described().await;
        let mut session = inst
            .start_interactive(ExecuteRequest::new("repl", Vec::<String>::new()))
            .await
            .unwrap();
        assert_eq!(session.recv().await, Some(StreamMessage::stdout("ready\n")));
        session.send_stdin("ping\n").await.unwrap();
        assert_eq!(session.recv().await, Some(StreamMessage::stdout("ping\n")));
        session.send_stdin("quit\n").await.unwrap();
        let rest = session.wait().await;
        assert_eq!(rest.exit_code, Some(0));
        assert!(session.send_stdin("late\n").await.is_err());
    }

    #[tokio::test]
    async fn unary_calls_complete_while_a_session_goes_unread() {
        let inst = described().await;
        let mut session = inst
            .start_interactive(ExecuteRequest::new("repl", Vec::<String>::new()))
            .await
            .unwrap();
        for n in 0..300 {
            if session.send_stdin(format!("line {n}\n")).await.is_err() {
                break;
            }
        }

        let resp = tokio::time::timeout(
            Duration::from_secs(5),
            inst.execute(ExecuteRequest::new("say", ["hi"])),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(resp.stdout_text(), "hi\n");

        let _ = session.send_stdin("quit\n").await;
        let rest = tokio::time::timeout(Duration::from_secs(5), session.wait())
            .await
            .unwrap();
        assert!(rest.stdout.starts_with(b"ready\nline 0\n"));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn cancelled_session_reaches_the_plugin() {
        let plugin = EchoPlugin::default();
        let spy = plugin.clone();
        let inst = PluginInstance::describe(connect(plugin).await, Duration::from_secs(5))
            .await
            .unwrap();
        let mut session = inst
            .start_interactive(ExecuteRequest::new("repl", Vec::<String>::new()))
            .await
            .unwrap();
        assert!(session.recv().await.is_some());
        session.close().await;
        tokio::time::timeout(Duration::from_secs(5), spy.wait_cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_runs_stop_once_and_closes() {
        let plugin = EchoPlugin::default();
        let spy = plugin.clone();
        let inst = PluginInstance::describe(connect(plugin).await, Duration::from_secs(5))
            .await
            .unwrap();
        inst.init().await.unwrap();
        inst.shutdown(Duration::from_secs(1)).await.unwrap();
        inst.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(spy.hooks(), vec!["init", "stop"]);
        assert!(!inst.is_process_alive().await);
        assert!(!inst.health_check().await.healthy);
    }

    #[tokio::test]
    async fn bad_plugin_name_fails_describe() {
        let err = PluginInstance::describe(
            connect(EchoPlugin::named("Bad_Name")).await,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::Handshake { .. }));
    }

    #[tokio::test]
    async fn future_sdk_requirement_fails_describe() {
        let err = PluginInstance::describe(
            connect(EchoPlugin::default().requiring_sdk("99.0.0")).await,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("requires SDK 99.0.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_plugin_times_out_describe() {
        let (launched, _plugin_side) = launched();
        let err = PluginInstance::describe(launched, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Launch { .. }));
    }
}
