//! Child process supervision.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use drover_core::HandshakeConfig;

use crate::error::{PluginError, PluginResult};

/// How long to wait after SIGTERM before killing.
#[cfg(unix)]
const TERM_WAIT: Duration = Duration::from_millis(500);

/// A running plugin executable.
///
/// The child is killed if this value is dropped while it is still running.
#[derive(Debug)]
pub struct PluginProcess {
    label: String,
    child: Child,
    stderr_task: Option<JoinHandle<()>>,
}

/// The pipes the RPC layer speaks over.
#[derive(Debug)]
pub struct ProcessPipes {
    /// Plugin stdin.
    pub stdin: ChildStdin,
    /// Plugin stdout, buffered for line reads.
    pub stdout: BufReader<ChildStdout>,
}

impl PluginProcess {
    /// Launch `path` with piped stdio and the handshake cookie set.
    ///
    /// The working directory is the executable's directory. Stderr lines
    /// are forwarded to the log at debug level.
    ///
    /// # Errors
    ///
    /// [`PluginError::Launch`] if the process cannot be started.
    pub fn spawn(path: &Path, handshake: &HandshakeConfig) -> PluginResult<(Self, ProcessPipes)> {
        let label = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        let mut command = Command::new(path);
        command
            .env(&handshake.magic_cookie_key, &handshake.magic_cookie_value)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let launch_err = |message: String| PluginError::Launch {
            plugin: label.clone(),
            message,
        };

        let mut child = command
            .spawn()
            .map_err(|e| launch_err(format!("spawn failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| launch_err("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_err("stdout not captured".into()))?;
        let stderr_task = child.stderr.take().map(|stderr| {
            let label = label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "drover::plugin_stderr", plugin = %label, "{line}");
                }
            })
        });

        debug!(plugin = %label, pid = ?child.id(), "plugin process started");

        Ok((
            Self {
                label,
                child,
                stderr_task,
            },
            ProcessPipes {
                stdin,
                stdout: BufReader::new(stdout),
            },
        ))
    }

    /// OS process id, while running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait up to `grace` for the process to exit, then terminate it.
    ///
    /// The caller is expected to have closed stdin already, which is how
    /// an SDK plugin learns it should exit. Returns the exit status if the
    /// process exited on its own.
    ///
    /// # Errors
    ///
    /// [`PluginError::Io`] if waiting on or killing the process fails.
    pub async fn shutdown(&mut self, grace: Duration) -> PluginResult<Option<ExitStatus>> {
        if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
            debug!(plugin = %self.label, %status, "plugin process exited");
            return Ok(Some(status));
        }

        #[cfg(unix)]
        {
            if self.terminate() {
                if let Ok(Ok(status)) = tokio::time::timeout(TERM_WAIT, self.child.wait()).await {
                    debug!(plugin = %self.label, %status, "plugin process exited after SIGTERM");
                    return Ok(None);
                }
            }
        }

        warn!(plugin = %self.label, "plugin process did not exit in time, killing");
        self.kill().await?;
        Ok(None)
    }

    /// Kill the process immediately and reap it.
    ///
    /// # Errors
    ///
    /// [`PluginError::Io`] if the kill fails for a reason other than the
    /// process having already exited.
    pub async fn kill(&mut self) -> PluginResult<()> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(unix)]
    fn terminate(&self) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id().and_then(|p| i32::try_from(p).ok()) else {
            return false;
        };
        kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
    }
}

impl Drop for PluginProcess {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}
