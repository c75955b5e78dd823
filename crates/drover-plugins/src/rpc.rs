//! Multiplexed RPC client over a plugin's stdio.
//!
//! One writer task drains outbound frames into the plugin's stdin. One
//! reader task parses the plugin's stdout and routes each frame:
//! `Response` frames complete the matching pending call, `Stream` frames
//! are forwarded to the matching interactive session. When stdout reaches
//! EOF, every pending call fails with [`RpcError::Closed`] and every
//! session channel is closed.
//!
//! The reader never waits on a session. A session whose buffer is full is
//! dropped and the plugin is told to abandon it, so one unread session
//! cannot hold up responses for everyone else. A line longer than
//! [`MAX_FRAME_BYTES`] closes the connection.
//!
//! The client is generic over the byte streams, so tests can drive it over
//! `tokio::io::duplex` without spawning processes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use drover_core::{Frame, Method, RpcFault, StreamMessage};

/// Outbound frames buffered before callers start waiting.
const OUTBOUND_CAPACITY: usize = 64;

/// Messages buffered per interactive session.
pub(crate) const SESSION_CAPACITY: usize = 64;

/// Longest frame line accepted from a plugin.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The connection is gone: the plugin exited, closed stdout, or the
    /// client was shut down.
    #[error("connection closed")]
    Closed,
    /// The plugin answered with a fault.
    #[error("{0}")]
    Fault(RpcFault),
    /// A frame could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(String),
    /// The answer did not have the expected shape.
    #[error("unexpected answer to {method}: {message}")]
    Decode {
        /// Method that was called.
        method: &'static str,
        /// Decoder message.
        message: String,
    },
}

type Reply = Result<Value, RpcError>;

#[derive(Default)]
struct Routes {
    pending: HashMap<u64, oneshot::Sender<Reply>>,
    sessions: HashMap<u64, mpsc::Sender<StreamMessage>>,
    closed: bool,
}

#[derive(Clone, Default)]
struct SharedRoutes(Arc<Mutex<Routes>>);

impl SharedRoutes {
    fn lock(&self) -> MutexGuard<'_, Routes> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark closed, fail every pending call, drop every session sender.
    fn close(&self) {
        let (pending, sessions) = {
            let mut routes = self.lock();
            routes.closed = true;
            (
                std::mem::take(&mut routes.pending),
                std::mem::take(&mut routes.sessions),
            )
        };
        for (_, tx) in pending {
            let _ = tx.send(Err(RpcError::Closed));
        }
        drop(sessions);
    }
}

struct ClientInner {
    label: String,
    outbound: mpsc::Sender<String>,
    routes: SharedRoutes,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientInner {
    fn abort_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Handle to a plugin connection. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("label", &self.inner.label)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Removes a pending entry if the caller stops waiting before the answer.
struct PendingGuard<'a> {
    routes: &'a SharedRoutes,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.routes.lock().pending.remove(&self.id);
    }
}

impl RpcClient {
    /// Start the reader and writer tasks.
    ///
    /// `reader` must already be positioned after the handshake line.
    pub fn spawn<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        let routes = SharedRoutes::default();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let writer_task = tokio::spawn(write_loop(
            label.clone(),
            writer,
            outbound_rx,
            routes.clone(),
        ));
        let reader_task = tokio::spawn(read_loop(
            label.clone(),
            reader,
            routes.clone(),
            outbound.clone(),
        ));

        Self {
            inner: Arc::new(ClientInner {
                label,
                outbound,
                routes,
                next_id: AtomicU64::new(1),
                tasks: Mutex::new(vec![writer_task, reader_task]),
            }),
        }
    }

    /// Whether the connection has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.routes.lock().closed
    }

    /// Allocate a fresh id for a request or session.
    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Call a method and wait for the raw answer.
    ///
    /// # Errors
    ///
    /// [`RpcError::Fault`] if the plugin answered with a fault,
    /// [`RpcError::Closed`] if the connection went away first.
    pub async fn call(&self, method: Method) -> Result<Value, RpcError> {
        let id = self.next_id();
        let name = method.name();
        let line = Frame::Request { id, method }
            .to_line()
            .map_err(|e| RpcError::Encode(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut routes = self.inner.routes.lock();
            if routes.closed {
                return Err(RpcError::Closed);
            }
            routes.pending.insert(id, tx);
        }
        let _guard = PendingGuard {
            routes: &self.inner.routes,
            id,
        };

        self.inner
            .outbound
            .send(line)
            .await
            .map_err(|_| RpcError::Closed)?;
        trace!(plugin = %self.inner.label, id, method = name, "request sent");

        rx.await.map_err(|_| RpcError::Closed)?
    }

    /// Call a method and decode the answer.
    ///
    /// # Errors
    ///
    /// As [`RpcClient::call`], plus [`RpcError::Decode`] if the answer does
    /// not match `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, method: Method) -> Result<T, RpcError> {
        let name = method.name();
        let value = self.call(method).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode {
            method: name,
            message: e.to_string(),
        })
    }

    /// Register a new session and return its id and inbound channel.
    ///
    /// The session is registered before the plugin is asked to start it,
    /// so no early output is lost.
    ///
    /// # Errors
    ///
    /// [`RpcError::Closed`] if the connection is gone.
    pub(crate) fn open_session(&self) -> Result<(u64, mpsc::Receiver<StreamMessage>), RpcError> {
        let id = self.next_id();
        let (tx, rx) = mpsc::channel(SESSION_CAPACITY);
        let mut routes = self.inner.routes.lock();
        if routes.closed {
            return Err(RpcError::Closed);
        }
        routes.sessions.insert(id, tx);
        Ok((id, rx))
    }

    /// Send a stream frame for a session.
    ///
    /// # Errors
    ///
    /// [`RpcError::Closed`] if the connection is gone.
    pub(crate) async fn send_stream(
        &self,
        session: u64,
        message: StreamMessage,
    ) -> Result<(), RpcError> {
        self.send_frame(&Frame::Stream { session, message }).await
    }

    /// Forget a session. With `notify`, also tell the plugin to abandon it.
    pub(crate) async fn close_session(&self, session: u64, notify: bool) {
        let was_open = self.inner.routes.lock().sessions.remove(&session).is_some();
        if notify && was_open {
            if let Err(e) = self.send_frame(&Frame::CloseSession { session }).await {
                debug!(plugin = %self.inner.label, session, error = %e, "could not send session close");
            }
        }
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        let line = frame.to_line().map_err(|e| RpcError::Encode(e.to_string()))?;
        self.inner
            .outbound
            .send(line)
            .await
            .map_err(|_| RpcError::Closed)
    }

    /// Shut the connection down.
    ///
    /// Pending calls fail with [`RpcError::Closed`], sessions end, and the
    /// writer is dropped, which closes the plugin's stdin.
    pub fn close(&self) {
        self.inner.routes.close();
        self.inner.abort_tasks();
    }
}

async fn write_loop<W>(
    label: String,
    mut writer: W,
    mut outbound: mpsc::Receiver<String>,
    routes: SharedRoutes,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(plugin = %label, error = %e, "failed to write to plugin stdin");
            break;
        }
    }
    routes.close();
}

/// How a bounded line read ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LineRead {
    /// Stream ended with nothing buffered.
    Eof,
    /// A line (possibly unterminated at EOF) is in the buffer.
    Line,
    /// The line grew past the limit. The buffer holds a partial prefix.
    TooLong,
}

/// Read one `\n`-terminated line into `buf`, refusing to buffer more than
/// `limit` bytes.
pub(crate) async fn read_line_capped<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if buf.is_empty() {
                LineRead::Eof
            } else {
                LineRead::Line
            });
        }
        let (used, done) = match available.iter().position(|b| *b == b'\n') {
            Some(idx) => (idx + 1, true),
            None => (available.len(), false),
        };
        if buf.len() + used > limit {
            let room = limit.saturating_sub(buf.len());
            buf.extend_from_slice(&available[..room.min(used)]);
            return Ok(LineRead::TooLong);
        }
        buf.extend_from_slice(&available[..used]);
        reader.consume(used);
        if done {
            return Ok(LineRead::Line);
        }
    }
}

async fn read_loop<R>(
    label: String,
    mut reader: R,
    routes: SharedRoutes,
    outbound: mpsc::Sender<String>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        match read_line_capped(&mut reader, &mut buf, MAX_FRAME_BYTES).await {
            Ok(LineRead::Eof) => {
                debug!(plugin = %label, "plugin closed stdout");
                break;
            },
            Ok(LineRead::Line) => {},
            Ok(LineRead::TooLong) => {
                warn!(
                    plugin = %label,
                    limit = MAX_FRAME_BYTES,
                    "frame exceeds size limit; closing connection"
                );
                break;
            },
            Err(e) => {
                warn!(plugin = %label, error = %e, "failed to read plugin stdout");
                break;
            },
        }
        let Ok(line) = std::str::from_utf8(&buf) else {
            warn!(plugin = %label, "discarding frame that is not valid UTF-8");
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame = match Frame::from_line(line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(plugin = %label, error = %e, "discarding malformed frame");
                continue;
            },
        };

        match frame {
            Frame::Response { id, outcome } => {
                let waiter = routes.lock().pending.remove(&id);
                match waiter {
                    Some(tx) => {
                        let reply = Result::<Value, RpcFault>::from(outcome).map_err(RpcError::Fault);
                        let _ = tx.send(reply);
                    },
                    None => debug!(plugin = %label, id, "response for unknown or abandoned request"),
                }
            },
            Frame::Stream { session, message } => {
                route_stream(&label, &routes, &outbound, session, message);
            },
            Frame::Request { .. } | Frame::CloseSession { .. } => {
                warn!(plugin = %label, "plugin sent a host-only frame; ignoring");
            },
        }
    }
    routes.close();
}

/// Hand a stream message to its session without waiting.
fn route_stream(
    label: &str,
    routes: &SharedRoutes,
    outbound: &mpsc::Sender<String>,
    session: u64,
    message: StreamMessage,
) {
    let mut routes = routes.lock();
    let Some(tx) = routes.sessions.get(&session) else {
        trace!(plugin = %label, session, "stream frame for closed session");
        return;
    };
    match tx.try_send(message) {
        Ok(()) => {},
        Err(mpsc::error::TrySendError::Closed(_)) => {
            routes.sessions.remove(&session);
        },
        Err(mpsc::error::TrySendError::Full(_)) => {
            routes.sessions.remove(&session);
            drop(routes);
            warn!(
                plugin = %label,
                session,
                capacity = SESSION_CAPACITY,
                "session output not consumed; closing session"
            );
            if let Ok(line) = (Frame::CloseSession { session }).to_line() {
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let _ = outbound.send(line).await;
                });
            }
        },
    }
}
