//! Shared helpers for end-to-end plugin tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use drover_plugins::{HostConfig, PluginManager};
use drover_telemetry::{LogConfig, LogTarget, setup_logging};
use tempfile::TempDir;

/// A fixture plugin copied into its own private directory.
///
/// The directory is removed when this is dropped.
#[allow(dead_code)]
pub struct InstalledPlugin {
    /// Directory holding the executable and any manifest.
    pub dir: TempDir,
    /// The executable.
    pub path: PathBuf,
}

#[allow(dead_code)]
impl InstalledPlugin {
    /// Write a side-car `plugin.yaml` next to the executable.
    pub fn write_manifest(&self, yaml: &str) -> PathBuf {
        let path = self.dir.path().join("plugin.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    /// Change the executable's mode bits.
    pub fn chmod(&self, mode: u32) {
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(mode)).unwrap();
    }
}

fn install(source: &str, name: &str) -> InstalledPlugin {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::copy(source, &path).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    InstalledPlugin { dir, path }
}

/// The v2 `hello` plugin.
#[allow(dead_code)]
pub fn hello_plugin() -> InstalledPlugin {
    install(env!("CARGO_BIN_EXE_hello-plugin"), "hello-plugin")
}

/// The v1 `legacy` plugin.
#[allow(dead_code)]
pub fn legacy_plugin() -> InstalledPlugin {
    install(env!("CARGO_BIN_EXE_legacy-plugin"), "legacy-plugin")
}

/// A plugin that never completes the handshake.
#[allow(dead_code)]
pub fn slow_plugin() -> InstalledPlugin {
    install(env!("CARGO_BIN_EXE_slow-plugin"), "slow-plugin")
}

/// A manager with short timeouts.
#[allow(dead_code)]
pub fn manager() -> PluginManager {
    PluginManager::new(
        HostConfig::default()
            .with_handshake_timeout(Duration::from_secs(5))
            .with_shutdown_grace(Duration::from_secs(2)),
    )
}

/// Path of a file that does not exist.
#[allow(dead_code)]
pub fn missing(dir: &Path) -> PathBuf {
    dir.join("does-not-exist")
}

fn init_logging() {
    let config = LogConfig::new("warn")
        .with_target(LogTarget::Stderr)
        .with_directive("drover_plugins=debug");
    // Only the first call in a test binary wins.
    let _ = setup_logging(&config);
}
