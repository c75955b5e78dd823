//! Host side of an interactive command session.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use drover_core::StreamMessage;

use crate::error::{PluginError, PluginResult};
use crate::rpc::{RpcClient, SESSION_CAPACITY};

/// Everything a session wrote before it ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOutput {
    /// Concatenated stdout chunks.
    pub stdout: Vec<u8>,
    /// Concatenated stderr chunks.
    pub stderr: Vec<u8>,
    /// Exit code, if the plugin reported one.
    pub exit_code: Option<i32>,
}

/// A bidirectional stream to one interactive command.
///
/// Output arrives through [`recv`](Self::recv) in the order the plugin sent
/// it. The stream ends after an `Exit` message, after [`cancel`](Self::cancel),
/// when the plugin goes away, or when output is left unread long enough to
/// overflow the session buffer. Dropping the session cancels it and tells
/// the plugin to abandon the command.
#[derive(Debug)]
pub struct InteractiveSession {
    plugin: String,
    id: u64,
    rpc: RpcClient,
    output: mpsc::Receiver<StreamMessage>,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
    exit_code: Option<i32>,
}

impl InteractiveSession {
    pub(crate) fn new(
        plugin: &str,
        id: u64,
        rpc: RpcClient,
        inbound: mpsc::Receiver<StreamMessage>,
    ) -> Self {
        let (tx, output) = mpsc::channel(SESSION_CAPACITY);
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump(rpc.clone(), id, inbound, tx, cancel.clone()));
        Self {
            plugin: plugin.to_string(),
            id,
            rpc,
            output,
            cancel,
            pump: Some(pump),
            exit_code: None,
        }
    }

    /// Session id on the wire.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Owning plugin.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Exit code, once the plugin has reported one.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Whether the session can still accept input.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.exit_code.is_none() && !self.cancel.is_cancelled() && !self.rpc.is_closed()
    }

    /// Send a message to the plugin.
    ///
    /// # Errors
    ///
    /// [`PluginError::SessionClosed`] once the session has ended.
    pub async fn send(&self, message: StreamMessage) -> PluginResult<()> {
        if !self.is_open() {
            return Err(self.closed());
        }
        self.rpc
            .send_stream(self.id, message)
            .await
            .map_err(|_| self.closed())
    }

    /// Send a chunk of stdin.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub async fn send_stdin(&self, data: impl Into<Vec<u8>>) -> PluginResult<()> {
        self.send(StreamMessage::stdin(data)).await
    }

    /// Next message from the plugin, or `None` once the session has ended.
    ///
    /// The `Exit` message itself is returned once; after it, `None`.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        if self.exit_code.is_some() {
            return None;
        }
        let message = self.output.recv().await?;
        if let StreamMessage::Exit { code } = message {
            self.exit_code = Some(code);
        }
        Some(message)
    }

    /// Drain the session until it ends.
    pub async fn wait(&mut self) -> SessionOutput {
        let mut out = SessionOutput::default();
        while let Some(message) = self.recv().await {
            match message {
                StreamMessage::Stdout(data) => out.stdout.extend(data),
                StreamMessage::Stderr(data) => out.stderr.extend(data),
                StreamMessage::Exit { code } => out.exit_code = Some(code),
                StreamMessage::Stdin(_) => {},
            }
        }
        out.exit_code = out.exit_code.or(self.exit_code);
        out
    }

    /// Abandon the session. The plugin is told to cancel the command.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait until the plugin has been notified.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }

    fn closed(&self) -> PluginError {
        PluginError::SessionClosed {
            plugin: self.plugin.clone(),
            session: self.id,
        }
    }
}

impl Drop for InteractiveSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump(
    rpc: RpcClient,
    session: u64,
    mut inbound: mpsc::Receiver<StreamMessage>,
    output: mpsc::Sender<StreamMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            message = inbound.recv() => message,
        };
        let Some(message) = message else {
            debug!(session, "session stream ended without exit");
            cancel.cancel();
            return;
        };
        let exit = message.is_exit();
        tokio::select! {
            () = cancel.cancelled() => break,
            sent = output.send(message) => {
                if sent.is_err() {
                    break;
                }
            },
        }
        if exit {
            rpc.close_session(session, false).await;
            return;
        }
    }
    rpc.close_session(session, true).await;
}
