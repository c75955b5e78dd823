//! Serving a plugin to the host over stdio.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drover_core::{
    ExecuteRequest, ExecuteResponse, FaultCode, Frame, HandshakeConfig, MetadataResponse, Method,
    Outcome, RpcFault, SDK_VERSION, StreamMessage,
};

use crate::adapters::LegacyAdapter;
use crate::context::Context;
use crate::error::{SdkError, SdkResult};
use crate::io::{Outbound, SessionIo};
use crate::legacy::LegacyPlugin;
use crate::plugin::Plugin;

const OUTBOUND_CAPACITY: usize = 64;
const SESSION_CAPACITY: usize = 64;

/// How long in-flight answers may keep flushing after the host hangs up.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve `plugin` on stdin/stdout until the host closes stdin.
///
/// A binary started without the handshake cookie was not launched by
/// Drover; it prints a notice and exits with status 1.
///
/// # Errors
///
/// Fails if stdin cannot be read or stdout cannot be written.
pub async fn serve<P: Plugin>(plugin: P) -> SdkResult<()> {
    let handshake = HandshakeConfig::default();
    let cookie = std::env::var(&handshake.magic_cookie_key).ok();
    if cookie.as_deref() != Some(handshake.magic_cookie_value.as_str()) {
        eprintln!(
            "This binary is a Drover plugin and is not meant to be run directly.\n\
             Install it into a Drover plugin directory and invoke its commands through drover."
        );
        std::process::exit(1);
    }
    serve_io(plugin, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve a v1 plugin through [`LegacyAdapter`].
///
/// # Errors
///
/// As [`serve`].
pub async fn serve_legacy<P: LegacyPlugin>(plugin: P) -> SdkResult<()> {
    serve(LegacyAdapter::new(plugin)).await
}

/// Serve `plugin` over arbitrary byte streams.
///
/// Writes the handshake line, then answers frames until `reader` reaches
/// EOF. Each request runs on its own task, so a long interactive session
/// does not hold up unary calls. Session input is queued without waiting;
/// a handler that stops reading has its session ended. When the host hangs
/// up every in-flight call and session is cancelled.
///
/// # Errors
///
/// Fails if `reader` errors or the handshake cannot be written.
pub async fn serve_io<P, R, W>(plugin: P, reader: R, writer: W) -> SdkResult<()>
where
    P: Plugin,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_lines(writer, rx));

    let server = Arc::new(Server {
        name: plugin.metadata().name,
        plugin,
        outbound: Outbound::new(tx),
        sessions: Mutex::new(HashMap::new()),
        root: CancellationToken::new(),
    });

    let mut hello = serde_json::to_string(&HandshakeConfig::default().hello(SDK_VERSION))?;
    hello.push('\n');
    server.outbound.send_line(hello).await?;
    info!(plugin = %server.name, sdk_version = SDK_VERSION, "plugin serving");

    let mut lines = BufReader::new(reader).lines();
    let result = loop {
        match lines.next_line().await {
            Ok(Some(line)) => server.dispatch(&line).await,
            Ok(None) => break Ok(()),
            Err(e) => break Err(SdkError::from(e)),
        }
    };

    debug!(plugin = %server.name, "host hung up");
    server.root.cancel();
    server.sessions().clear();
    drop(server);

    if tokio::time::timeout(DRAIN_TIMEOUT, writer_task).await.is_err() {
        warn!("in-flight calls did not finish before shutdown");
    }
    result
}

struct SessionHandle {
    input: mpsc::Sender<StreamMessage>,
    cancel: CancellationToken,
}

struct Server<P> {
    name: String,
    plugin: P,
    outbound: Outbound,
    sessions: Mutex<HashMap<u64, SessionHandle>>,
    root: CancellationToken,
}

impl<P: Plugin> Server<P> {
    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context(&self, cancel: CancellationToken) -> Context {
        Context::with_token(self.name.clone(), cancel)
    }

    async fn dispatch(self: &Arc<Self>, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let frame = match Frame::from_line(line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "ignoring malformed frame from host");
                return;
            },
        };

        match frame {
            Frame::Request {
                id,
                method: Method::StartInteractive { session, request },
            } => self.start_session(id, session, request).await,
            Frame::Request { id, method } => {
                let server = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = server.handle(method).await;
                    server.respond(id, outcome).await;
                });
            },
            Frame::Stream { session, message } => self.forward_input(session, message),
            Frame::CloseSession { session } => {
                if let Some(handle) = self.sessions().remove(&session) {
                    debug!(session, "host cancelled session");
                    handle.cancel.cancel();
                }
            },
            Frame::Response { id, .. } => warn!(id, "host sent a response frame, ignoring"),
        }
    }

    /// Queue host input for a session. A session whose input buffer is
    /// full is ended with exit code 1 instead of stalling the dispatch loop.
    fn forward_input(self: &Arc<Self>, session: u64, message: StreamMessage) {
        let mut sessions = self.sessions();
        let Some(handle) = sessions.get(&session) else {
            debug!(session, "input for finished session");
            return;
        };
        match handle.input.try_send(message) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {},
            Err(mpsc::error::TrySendError::Full(_)) => {
                if let Some(handle) = sessions.remove(&session) {
                    handle.cancel.cancel();
                }
                drop(sessions);
                warn!(
                    session,
                    capacity = SESSION_CAPACITY,
                    "session input not consumed; ending session"
                );
                let server = Arc::clone(self);
                tokio::spawn(async move {
                    for message in [
                        StreamMessage::stderr("session input buffer overflowed\n"),
                        StreamMessage::Exit { code: 1 },
                    ] {
                        let frame = Frame::Stream { session, message };
                        if server.outbound.send(&frame).await.is_err() {
                            break;
                        }
                    }
                });
            },
        }
    }

    async fn respond(&self, id: u64, outcome: Outcome) {
        if let Err(e) = self.outbound.send(&Frame::Response { id, outcome }).await {
            debug!(id, error = %e, "could not deliver response");
        }
    }

    async fn handle(&self, method: Method) -> Outcome {
        let name = method.name();
        let ctx = self.context(self.root.child_token());
        let result = match method {
            Method::GetMetadata => to_value(&MetadataResponse {
                descriptor: self.plugin.metadata(),
                commands: self.plugin.commands(),
                capabilities: self.plugin.capabilities(),
            }),
            Method::Configure { config } => match serde_json::from_value::<P::Config>(config) {
                Ok(config) => unit(self.plugin.configure(&ctx, config).await),
                Err(e) => Err(SdkError::InvalidConfig(e.to_string()).to_fault()),
            },
            Method::Init => match self.plugin.as_initializer() {
                Some(hook) => unit(hook.init(&ctx).await),
                None => Err(RpcFault::unimplemented(name)),
            },
            Method::Start => match self.plugin.as_starter() {
                Some(hook) => unit(hook.start(&ctx).await),
                None => Err(RpcFault::unimplemented(name)),
            },
            Method::Stop => match self.plugin.as_stopper() {
                Some(hook) => unit(hook.stop(&ctx).await),
                None => Err(RpcFault::unimplemented(name)),
            },
            Method::HealthCheck => match self.plugin.as_health_checker() {
                Some(hook) => hook
                    .health_check(&ctx)
                    .await
                    .map_err(|e| e.to_fault())
                    .and_then(|report| to_value(&report)),
                None => Err(RpcFault::unimplemented(name)),
            },
            Method::Execute { request } => self.execute(&ctx, request).await,
            Method::StartInteractive { .. } => Err(RpcFault::new(
                FaultCode::InvalidRequest,
                "interactive sessions cannot be nested in a request",
            )),
        };
        if let Err(fault) = &result {
            if !fault.is_unimplemented() {
                debug!(method = name, %fault, "request failed");
            }
        }
        Outcome::from(result)
    }

    async fn execute(&self, ctx: &Context, request: ExecuteRequest) -> Result<Value, RpcFault> {
        let command = request.command.clone();
        match self.plugin.execute(ctx, request).await {
            Ok(response) => to_value(&response),
            Err(e @ SdkError::UnknownCommand(_)) => Err(e.to_fault()),
            Err(e) => {
                debug!(command = %command, error = %e, "command failed");
                to_value(&ExecuteResponse::failure(1, e.to_string()))
            },
        }
    }

    async fn start_session(self: &Arc<Self>, id: u64, session: u64, request: ExecuteRequest) {
        let known = self.plugin.commands().iter().any(|c| {
            c.name == request.command || c.aliases.iter().any(|a| *a == request.command)
        });
        if !known {
            let fault = SdkError::UnknownCommand(request.command).to_fault();
            self.respond(id, Outcome::Err(fault)).await;
            return;
        }

        let (input, input_rx) = mpsc::channel(SESSION_CAPACITY);
        let cancel = self.root.child_token();
        self.sessions().insert(
            session,
            SessionHandle {
                input,
                cancel: cancel.clone(),
            },
        );
        self.respond(id, Outcome::unit()).await;

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let io = SessionIo::new(session, input_rx, server.outbound.clone(), cancel.clone());
            let ctx = server.context(cancel.clone());
            let code = match server.plugin.interactive(&ctx, request, io).await {
                Ok(code) => code,
                Err(e) => {
                    let message = StreamMessage::stderr(format!("{e}\n"));
                    let _ = server.outbound.send(&Frame::Stream { session, message }).await;
                    1
                },
            };
            server.sessions().remove(&session);
            if !cancel.is_cancelled() {
                let message = StreamMessage::Exit { code };
                let _ = server.outbound.send(&Frame::Stream { session, message }).await;
            }
            debug!(session, code, "interactive session finished");
        });
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, RpcFault> {
    serde_json::to_value(value).map_err(|e| RpcFault::new(FaultCode::Internal, e.to_string()))
}

fn unit(result: SdkResult<()>) -> Result<Value, RpcFault> {
    result.map(|()| Value::Null).map_err(|e| e.to_fault())
}

async fn write_lines<W>(mut writer: W, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(error = %e, "failed to write to host");
            break;
        }
    }
}
