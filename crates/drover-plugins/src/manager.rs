//! The plugin manager: loading, dispatch and teardown.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use drover_core::{ExecuteRequest, ExecuteResponse, HandshakeConfig, PluginDescriptor, Registry};

use crate::commands::ResolvedCommand;
use crate::config::HostConfig;
use crate::error::{PluginError, PluginResult, ValidationStep};
use crate::handshake::read_hello;
use crate::instance::{HealthStatus, Launched, PluginInstance};
use crate::manifest::PluginManifest;
use crate::process::PluginProcess;
use crate::rpc::RpcClient;
use crate::security::SecurityValidator;
use crate::session::InteractiveSession;

/// What to load, and how.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Plugin executable.
    pub path: PathBuf,
    /// Explicit manifest. When absent a side-car next to the executable is
    /// used if one exists.
    pub manifest: Option<PathBuf>,
    /// Configuration for the plugin's `configure` hook. Falls back to the
    /// manifest's `spec.config`.
    pub config: Option<Value>,
}

impl LoadOptions {
    /// Load `path` with defaults.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            manifest: None,
            config: None,
        }
    }

    /// Use an explicit manifest file.
    #[must_use]
    pub fn with_manifest(mut self, manifest: impl Into<PathBuf>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }

    /// Configure the plugin with `config`.
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }
}

/// Outcome of [`PluginManager::cleanup`].
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Plugins that shut down cleanly.
    pub stopped: Vec<String>,
    /// Plugins whose shutdown reported an error. Their processes are gone
    /// regardless.
    pub failed: Vec<(String, PluginError)>,
}

impl CleanupReport {
    /// Whether every plugin shut down cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Loads plugins, routes commands to them and shuts them down.
///
/// Safe to share between tasks. Plugins are registered under their
/// descriptor name and aliases; every lookup accepts either.
#[derive(Debug)]
pub struct PluginManager {
    config: HostConfig,
    validator: SecurityValidator,
    handshake: HandshakeConfig,
    plugins: Registry<Arc<PluginInstance>>,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl PluginManager {
    /// Create a manager with the given host configuration.
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self {
            validator: SecurityValidator::new(&config),
            handshake: HandshakeConfig::default(),
            plugins: Registry::new(),
            config,
        }
    }

    /// Host configuration in effect.
    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Load a plugin executable with default options.
    ///
    /// # Errors
    ///
    /// See [`load_with`](Self::load_with).
    pub async fn load(&self, path: impl AsRef<Path>) -> PluginResult<Arc<PluginInstance>> {
        self.load_with(LoadOptions::new(path.as_ref())).await
    }

    /// Validate, launch, handshake, describe, configure, init and register a
    /// plugin.
    ///
    /// Nothing is launched if validation fails. Any failure after launch
    /// kills the process before returning.
    ///
    /// # Errors
    ///
    /// [`PluginError::Manifest`] for an unreadable manifest,
    /// [`PluginError::Validation`] if the executable is rejected,
    /// [`PluginError::Launch`] or [`PluginError::Handshake`] if it does not
    /// speak the protocol, [`PluginError::Lifecycle`] if `configure` or
    /// `init` fails, and [`PluginError::AlreadyRegistered`] if its name or
    /// an alias is taken.
    pub async fn load_with(&self, options: LoadOptions) -> PluginResult<Arc<PluginInstance>> {
        let LoadOptions {
            path,
            manifest,
            config,
        } = options;

        let manifest = match manifest.or_else(|| PluginManifest::find_sidecar(&path)) {
            Some(manifest_path) => {
                debug!(manifest = %manifest_path.display(), "using plugin manifest");
                Some(PluginManifest::load(&manifest_path)?)
            },
            None => None,
        };

        let report = self.validator.validate(&path, manifest.as_ref())?;
        for warning in &report.warnings {
            warn!(path = %path.display(), "{warning}");
        }

        let (mut process, pipes) = PluginProcess::spawn(&path, &self.handshake)?;
        let label = path.display().to_string();
        let mut stdout = pipes.stdout;

        let hello = match read_hello(
            &mut stdout,
            &self.handshake,
            self.config.handshake_timeout(),
            &label,
        )
        .await
        {
            Ok(hello) => hello,
            Err(e) => {
                if let Err(kill) = process.kill().await {
                    warn!(path = %label, error = %kill, "failed to kill plugin after handshake failure");
                }
                return Err(e);
            },
        };

        let launched = Launched {
            rpc: RpcClient::spawn(label.clone(), stdout, pipes.stdin),
            label,
            path,
            process: Some(process),
            hello,
            report: Some(report),
        };

        let config = config.or_else(|| {
            manifest
                .map(|m| m.spec.config)
                .filter(|c| !c.is_null())
        });
        self.attach(launched, config).await
    }

    /// Steps shared by every connection once the handshake is done.
    pub(crate) async fn attach(
        &self,
        launched: Launched,
        config: Option<Value>,
    ) -> PluginResult<Arc<PluginInstance>> {
        let path = launched.path.clone();
        let instance = PluginInstance::describe(launched, self.config.metadata_timeout()).await?;
        let instance = Arc::new(instance);

        if let Err(e) = self.prepare(&instance, &path, config).await {
            instance.abort().await;
            return Err(e);
        }

        let descriptor = instance.descriptor();
        if let Err(e) = self.plugins.register(
            descriptor.name.clone(),
            descriptor.aliases.clone(),
            Arc::clone(&instance),
        ) {
            debug!(plugin = %instance.name(), error = %e, "registration lost a race");
            instance.abort().await;
            return Err(PluginError::AlreadyRegistered(instance.name().to_string()));
        }

        info!(
            plugin = %instance.name(),
            version = %instance.descriptor().version,
            commands = instance.commands().len(),
            "plugin loaded"
        );
        Ok(instance)
    }

    async fn prepare(
        &self,
        instance: &PluginInstance,
        path: &Path,
        config: Option<Value>,
    ) -> PluginResult<()> {
        let warnings = self
            .validator
            .capabilities()
            .validate(instance.capabilities())
            .map_err(|v| PluginError::validation(path, ValidationStep::Capabilities, v.to_string()))?;
        for warning in warnings {
            warn!(plugin = %instance.name(), "{warning}");
        }

        let descriptor = instance.descriptor();
        if let Some(taken) = std::iter::once(&descriptor.name)
            .chain(&descriptor.aliases)
            .find(|n| self.plugins.contains(n))
        {
            return Err(PluginError::AlreadyRegistered(taken.clone()));
        }

        if let Some(config) = config {
            instance.configure(config).await?;
        }
        instance.init().await
    }

    /// Look up a loaded plugin by name or alias.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotFound`] if nothing matches.
    pub fn get_plugin(&self, name: &str) -> PluginResult<Arc<PluginInstance>> {
        self.plugins
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    /// Descriptors of all loaded plugins, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<PluginDescriptor> {
        self.plugins
            .values()
            .iter()
            .map(|p| p.descriptor().clone())
            .collect()
    }

    /// Number of loaded plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Every command of every loaded plugin, sorted by plugin then name.
    #[must_use]
    pub fn command_table(&self) -> Vec<ResolvedCommand> {
        self.plugins
            .values()
            .iter()
            .flat_map(|p| {
                p.commands()
                    .list()
                    .into_iter()
                    .map(|c| ResolvedCommand::new(p.name(), c))
            })
            .collect()
    }

    /// Run a unary command.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotFound`] / [`PluginError::CommandNotFound`] for
    /// unknown names, [`PluginError::Usage`] if the command is interactive,
    /// plus anything [`PluginInstance::execute`] returns.
    pub async fn execute_command(
        &self,
        plugin: &str,
        command: &str,
        args: Vec<String>,
        flags: BTreeMap<String, String>,
    ) -> PluginResult<ExecuteResponse> {
        let instance = self.get_plugin(plugin)?;
        let resolved = instance.commands().resolve(command)?;
        if resolved.interactive {
            return Err(PluginError::Usage(format!(
                "command '{}' of plugin '{}' is interactive; start it as a session",
                resolved.name,
                instance.name()
            )));
        }
        let request = ExecuteRequest {
            command: resolved.name,
            args,
            flags,
        };
        instance.execute(request).await
    }

    /// Start an interactive command.
    ///
    /// # Errors
    ///
    /// As [`execute_command`](Self::execute_command), with
    /// [`PluginError::Usage`] if the command is not interactive.
    pub async fn start_interactive(
        &self,
        plugin: &str,
        command: &str,
        args: Vec<String>,
    ) -> PluginResult<InteractiveSession> {
        let instance = self.get_plugin(plugin)?;
        let resolved = instance.commands().resolve(command)?;
        if !resolved.interactive {
            return Err(PluginError::Usage(format!(
                "command '{}' of plugin '{}' is not interactive",
                resolved.name,
                instance.name()
            )));
        }
        instance
            .start_interactive(ExecuteRequest::new(resolved.name, args))
            .await
    }

    /// Start a loaded plugin.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotFound`], or as [`PluginInstance::start`].
    pub async fn start(&self, name: &str) -> PluginResult<()> {
        self.get_plugin(name)?.start().await
    }

    /// Stop a loaded plugin without unloading it.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotFound`], or as [`PluginInstance::stop`].
    pub async fn stop(&self, name: &str) -> PluginResult<()> {
        self.get_plugin(name)?.stop().await
    }

    /// Check a loaded plugin's health.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotFound`].
    pub async fn health_check(&self, name: &str) -> PluginResult<HealthStatus> {
        Ok(self.get_plugin(name)?.health_check().await)
    }

    /// Health of every loaded plugin, sorted by name.
    pub async fn health_check_all(&self) -> Vec<HealthStatus> {
        let mut statuses = Vec::new();
        for instance in self.plugins.values() {
            statuses.push(instance.health_check().await);
        }
        statuses
    }

    /// Remove a plugin from the table and shut it down.
    ///
    /// The name and aliases are free again as soon as this returns, even
    /// if the shutdown reported an error.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotFound`], or the shutdown error.
    pub async fn unload(&self, name: &str) -> PluginResult<()> {
        let (canonical, instance) = self
            .plugins
            .remove(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        info!(plugin = %canonical, "unloading plugin");
        instance.shutdown(self.config.shutdown_grace()).await
    }

    /// Shut every plugin down.
    ///
    /// Plugins are drained from the table first, so new lookups fail at
    /// once. Each is then stopped in name order; a failure is recorded and
    /// the rest still run.
    pub async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let grace = self.config.shutdown_grace();
        for (name, instance) in self.plugins.drain() {
            match instance.shutdown(grace).await {
                Ok(()) => report.stopped.push(name),
                Err(e) => {
                    warn!(plugin = %name, error = %e, "plugin did not shut down cleanly");
                    report.failed.push((name, e));
                },
            }
        }
        info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            "plugin cleanup finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::PluginState;
    use crate::test_support::{EchoPlugin, connect};

    async fn attach(manager: &PluginManager, plugin: EchoPlugin) -> PluginResult<Arc<PluginInstance>> {
        manager.attach(connect(plugin).await, None).await
    }

    #[tokio::test]
    async fn attach_registers_and_inits() {
        let manager = PluginManager::default();
        let inst = attach(&manager, EchoPlugin::default().with_alias("ec"))
            .await
            .unwrap();
        assert_eq!(inst.state(), PluginState::Initialized);
        assert!(Arc::ptr_eq(&manager.get_plugin("ec").unwrap(), &inst));
        assert_eq!(manager.list()[0].name, "echo");
    }

    #[tokio::test]
    async fn duplicate_name_keeps_the_original() {
        let manager = PluginManager::default();
        let first = attach(&manager, EchoPlugin::default()).await.unwrap();
        let err = attach(&manager, EchoPlugin::default()).await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyRegistered(ref n) if n == "echo"));
        assert_eq!(manager.len(), 1);
        assert!(Arc::ptr_eq(&manager.get_plugin("echo").unwrap(), &first));
        assert_eq!(first.state(), PluginState::Initialized);
    }

    #[tokio::test]
    async fn alias_clash_with_existing_name() {
        let manager = PluginManager::default();
        attach(&manager, EchoPlugin::named("alpha")).await.unwrap();
        let err = attach(&manager, EchoPlugin::named("beta").with_alias("alpha"))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::AlreadyRegistered(ref n) if n == "alpha"));
        assert!(manager.get_plugin("beta").is_err());
    }

    #[tokio::test]
    async fn config_reaches_the_plugin() {
        let manager = PluginManager::default();
        manager
            .attach(
                connect(EchoPlugin::default()).await,
                Some(serde_json::json!({"prefix": "# "})),
            )
            .await
            .unwrap();
        let resp = manager
            .execute_command("echo", "s", vec!["hi".into()], BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(resp.stdout_text(), "# hi\n");
    }

    #[tokio::test]
    async fn failing_init_is_not_registered() {
        let manager = PluginManager::default();
        let err = attach(&manager, EchoPlugin::default().failing_init())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Lifecycle { .. }));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn command_routing_errors() {
        let manager = PluginManager::default();
        attach(&manager, EchoPlugin::default()).await.unwrap();

        let err = manager
            .execute_command("nope", "say", vec![], BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NotFound(_)));

        let err = manager
            .execute_command("echo", "nope", vec![], BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::CommandNotFound { .. }));

        let err = manager
            .execute_command("echo", "repl", vec![], BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Usage(_)));

        let err = manager.start_interactive("echo", "say", vec![]).await.unwrap_err();
        assert!(matches!(err, PluginError::Usage(_)));
    }

    #[tokio::test]
    async fn command_table_is_sorted() {
        let manager = PluginManager::default();
        attach(&manager, EchoPlugin::named("zeta")).await.unwrap();
        attach(&manager, EchoPlugin::named("alpha")).await.unwrap();
        let table: Vec<_> = manager
            .command_table()
            .into_iter()
            .map(|c| format!("{}/{}", c.plugin, c.name))
            .collect();
        assert_eq!(
            table,
            vec![
                "alpha/fail",
                "alpha/repl",
                "alpha/say",
                "zeta/fail",
                "zeta/repl",
                "zeta/say"
            ]
        );
    }

    #[tokio::test]
    async fn lifecycle_through_the_manager() {
        let manager = PluginManager::default();
        attach(&manager, EchoPlugin::default()).await.unwrap();
        manager.start("echo").await.unwrap();
        assert!(manager.health_check("echo").await.unwrap().healthy);
        manager.stop("echo").await.unwrap();
        assert!(matches!(
            manager.stop("echo").await,
            Err(PluginError::InvalidTransition { .. })
        ));
        assert!(matches!(
            manager
                .execute_command("echo", "say", vec![], BTreeMap::new())
                .await,
            Err(PluginError::Stopped(_))
        ));
    }

    #[tokio::test]
    async fn unload_frees_name_and_aliases() {
        let manager = PluginManager::default();
        attach(&manager, EchoPlugin::default().with_alias("ec")).await.unwrap();
        manager.unload("ec").await.unwrap();
        assert!(matches!(manager.get_plugin("echo"), Err(PluginError::NotFound(_))));
        assert!(manager.get_plugin("ec").is_err());
        attach(&manager, EchoPlugin::named("other").with_alias("ec"))
            .await
            .unwrap();
        assert!(matches!(manager.unload("missing").await, Err(PluginError::NotFound(_))));
    }

    #[tokio::test]
    async fn cleanup_drains_everything() {
        let manager = PluginManager::default();
        let a = EchoPlugin::named("a");
        let b = EchoPlugin::named("b");
        attach(&manager, a.clone()).await.unwrap();
        attach(&manager, b.clone()).await.unwrap();

        let report = manager.cleanup().await;
        assert!(report.is_clean());
        assert_eq!(report.stopped, vec!["a", "b"]);
        assert!(manager.is_empty());
        assert_eq!(a.hooks(), vec!["init", "stop"]);
        assert_eq!(b.hooks(), vec!["init", "stop"]);
    }
}
