// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Loopback server -- accepts one-shot HTTP exchanges on 127.0.0.1.
//
// Both bridge endpoints are served by this type: the native shell's call
// endpoint and the hosted runtime's event ingress.  The server owns the
// accept loop and HTTP framing; what each request *means* is decided by a
// `RequestHandler`.
//
// The listener only ever binds the loopback interface.  Each connection is
// handled in its own task and closed after a single response.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shellbridge_core::error::{BridgeError, Result};
use shellbridge_core::types::ServerStatus;

use crate::http::{self, Headers};

/// Default cap on request bodies.
const DEFAULT_MAX_BODY: usize = 8 * 1024 * 1024;

/// How long a connection may take to deliver its request.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// An incoming request, already framed.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub method: String,
    /// Request target without the query string.
    pub path: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub peer: SocketAddr,
}

/// What to write back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReply {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl ServerReply {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json".into(),
                body,
            },
            Err(e) => Self::error(500, &format!("serialize reply: {e}")),
        }
    }

    /// JSON `{"ok": false, "error": message}` with the given status.
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "ok": false, "error": message });
        Self {
            status,
            content_type: "application/json".into(),
            body: body.to_string().into_bytes(),
        }
    }

    pub fn not_found(path: &str) -> Self {
        Self::error(404, &format!("no route for {path}"))
    }

    pub fn method_not_allowed(method: &str) -> Self {
        Self::error(405, &format!("method {method} not allowed"))
    }
}

/// Decides the reply for each request.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: ServerRequest) -> impl Future<Output = ServerReply> + Send;
}

/// Loopback-only HTTP server.
pub struct LoopbackServer {
    /// Requested port; 0 picks an ephemeral one.
    port: u16,
    /// Actual bound address once running.
    local_addr: Option<SocketAddr>,
    status: ServerStatus,
    max_body: usize,
    read_timeout: Duration,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
}

impl LoopbackServer {
    /// Create a stopped server for `127.0.0.1:{port}`.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            local_addr: None,
            status: ServerStatus::Stopped,
            max_body: DEFAULT_MAX_BODY,
            read_timeout: DEFAULT_READ_TIMEOUT,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Bound on reading a request; a peer that stays silent longer is dropped.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Bound address, available after [`start`](Self::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Port actually in use (the requested one until started).
    pub fn port(&self) -> u16 {
        self.local_addr.map(|a| a.port()).unwrap_or(self.port)
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the port is already in use.
    pub async fn start<H: RequestHandler>(&mut self, handler: Arc<H>) -> Result<SocketAddr> {
        if let (ServerStatus::Running, Some(addr)) = (self.status, self.local_addr) {
            debug!(%addr, "loopback server already running");
            return Ok(addr);
        }

        self.status = ServerStatus::Starting;

        let bind_addr: SocketAddr = ([127, 0, 0, 1], self.port).into();
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.status = ServerStatus::Error;
                return Err(BridgeError::Transport(format!("bind {bind_addr}: {e}")));
            }
        };
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "loopback server listening");

        let shutdown = Arc::clone(&self.shutdown_signal);
        let connections = Arc::clone(&self.active_connections);
        let limits = ReadLimits {
            max_body: self.max_body,
            timeout: self.read_timeout,
        };

        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, connections, handler, limits).await;
        });

        self.task_handle = Some(handle);
        self.local_addr = Some(local_addr);
        self.status = ServerStatus::Running;
        Ok(local_addr)
    }

    /// Stop accepting connections.  In-flight exchanges run to completion.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!(port = self.port(), "stopping loopback server");
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| BridgeError::Transport(format!("task join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        Ok(())
    }

    async fn accept_loop<H: RequestHandler>(
        listener: TcpListener,
        shutdown: Arc<Notify>,
        connections: Arc<AtomicU32>,
        handler: Arc<H>,
        limits: ReadLimits,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "incoming loopback connection");
                            let handler = Arc::clone(&handler);
                            let connections = Arc::clone(&connections);
                            tokio::spawn(async move {
                                connections.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) = Self::handle_connection(stream, peer_addr, handler, limits).await {
                                    warn!(peer = %peer_addr, error = %e, "connection handler error");
                                }
                                connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection<H: RequestHandler>(
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        handler: Arc<H>,
        limits: ReadLimits,
    ) -> Result<()> {
        let read = tokio::time::timeout(limits.timeout, http::read_message(&mut stream, limits.max_body)).await;
        let message = match read {
            Err(_) => {
                return Err(BridgeError::Transport(format!(
                    "no request within {}ms; closing",
                    limits.timeout.as_millis()
                )));
            }
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                warn!(peer = %peer_addr, error = %e, "unreadable request");
                let reply = ServerReply::error(400, &e.to_string());
                return send_reply(&mut stream, &reply).await;
            }
        };

        let method = message.start_line[0].to_ascii_uppercase();
        let target = message.start_line.get(1).cloned().unwrap_or_default();
        let path = target.split('?').next().unwrap_or_default().to_owned();

        debug!(
            peer = %peer_addr,
            %method,
            %path,
            bytes = message.body.len(),
            "parsed loopback request"
        );

        let request = ServerRequest {
            method,
            path,
            headers: message.headers,
            body: message.body,
            peer: peer_addr,
        };

        let reply = handler.handle(request).await;
        send_reply(&mut stream, &reply).await?;

        debug!(peer = %peer_addr, status = reply.status, "loopback reply sent");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct ReadLimits {
    max_body: usize,
    timeout: Duration,
}

async fn send_reply(stream: &mut TcpStream, reply: &ServerReply) -> Result<()> {
    let bytes = http::encode_response(reply.status, &reply.content_type, &reply.body);
    stream
        .write_all(&bytes)
        .await
        .map_err(|e| BridgeError::Transport(format!("write reply: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| BridgeError::Transport(format!("flush: {e}")))?;
    Ok(())
}
