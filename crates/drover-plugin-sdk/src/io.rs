//! Plugin side of an interactive session.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use drover_core::{Frame, StreamMessage};

use crate::error::{SdkError, SdkResult};

/// Sends encoded frames to the host's stdout writer.
#[derive(Debug, Clone)]
pub(crate) struct Outbound(mpsc::Sender<String>);

impl Outbound {
    pub(crate) fn new(tx: mpsc::Sender<String>) -> Self {
        Self(tx)
    }

    pub(crate) async fn send_line(&self, line: String) -> SdkResult<()> {
        self.0.send(line).await.map_err(|_| SdkError::Closed)
    }

    pub(crate) async fn send(&self, frame: &Frame) -> SdkResult<()> {
        self.send_line(frame.to_line()?).await
    }
}

/// Terminal-like I/O for one interactive command.
///
/// Input arrives as stdin chunks from the host; output is sent back as
/// stdout and stderr chunks. The exit code is whatever the plugin's
/// `interactive` method returns.
#[derive(Debug)]
pub struct SessionIo {
    session: u64,
    input: mpsc::Receiver<StreamMessage>,
    outbound: Outbound,
    cancel: CancellationToken,
    pending: Vec<u8>,
}

impl SessionIo {
    pub(crate) fn new(
        session: u64,
        input: mpsc::Receiver<StreamMessage>,
        outbound: Outbound,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            input,
            outbound,
            cancel,
            pending: Vec::new(),
        }
    }

    /// Session id on the wire.
    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Whether the host abandoned the session.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next raw stdin chunk. `None` once the session is cancelled or input
    /// has ended.
    pub async fn read_chunk(&mut self) -> Option<Vec<u8>> {
        if !self.pending.is_empty() {
            return Some(std::mem::take(&mut self.pending));
        }
        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => return None,
                message = self.input.recv() => message?,
            };
            if let StreamMessage::Stdin(data) = message {
                return Some(data);
            }
        }
    }

    /// Next line of stdin, without the line terminator.
    ///
    /// A trailing partial line is returned when input ends. `None` once
    /// the session is cancelled or input is exhausted.
    pub async fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            let chunk = tokio::select! {
                () = self.cancel.cancelled() => return None,
                message = self.input.recv() => message,
            };
            match chunk {
                Some(StreamMessage::Stdin(data)) => self.pending.extend(data),
                Some(_) => {},
                None if self.pending.is_empty() => return None,
                None => {
                    let rest = std::mem::take(&mut self.pending);
                    return Some(String::from_utf8_lossy(&rest).into_owned());
                },
            }
        }
    }

    /// Write to the host's stdout.
    ///
    /// # Errors
    ///
    /// [`SdkError::Closed`] if the host is gone.
    pub async fn write_stdout(&self, data: impl Into<Vec<u8>>) -> SdkResult<()> {
        self.write(StreamMessage::Stdout(data.into())).await
    }

    /// Write to the host's stderr.
    ///
    /// # Errors
    ///
    /// [`SdkError::Closed`] if the host is gone.
    pub async fn write_stderr(&self, data: impl Into<Vec<u8>>) -> SdkResult<()> {
        self.write(StreamMessage::Stderr(data.into())).await
    }

    async fn write(&self, message: StreamMessage) -> SdkResult<()> {
        if self.is_cancelled() {
            return Err(SdkError::Closed);
        }
        self.outbound
            .send(&Frame::Stream {
                session: self.session,
                message,
            })
            .await
    }
}
