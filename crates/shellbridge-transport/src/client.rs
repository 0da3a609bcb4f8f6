// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transport adapter -- performs one request/response exchange on the
// loopback channel.
//
// The adapter knows nothing about calls, events or snapshots.  It takes a
// method, URL, headers and body, and returns a normalised `Response` (body
// text, status, headers, plus an echo of the request config).  Connection
// failures are returned as `BridgeError::Transport` / `BridgeError::Io`; the
// adapter never retries.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use shellbridge_core::error::{BridgeError, Result};
use shellbridge_core::loopback::LoopbackUrl;

use crate::http::{self, Headers};

/// Default bound on a single exchange.
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Default largest response body accepted.
const DEFAULT_MAX_BODY: usize = 8 * 1024 * 1024;

/// What to send.  Echoed back inside the [`Response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestConfig {
    /// HTTP method; `GET` when absent.
    pub method: Option<String>,
    pub url: String,
    pub headers: Headers,
    /// Ignored for `GET`.
    pub body: Option<Vec<u8>>,
}

impl RequestConfig {
    /// A bodiless request to `url`; the method defaults to `GET`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: None,
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// A `POST` carrying `value` as a JSON body.
    pub fn post_json<T: Serialize>(url: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self {
            method: Some("POST".into()),
            url: url.into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(serde_json::to_vec(value)?),
        })
    }

    /// Append a header.  Names and values must not contain line breaks.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Upper-cased method with the `GET` default applied.
    pub fn effective_method(&self) -> String {
        self.method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_ascii_uppercase()
    }

    /// Body bytes that will actually go on the wire.
    pub fn effective_body(&self) -> &[u8] {
        if self.effective_method() == "GET" {
            return &[];
        }
        self.body.as_deref().unwrap_or(&[])
    }
}

/// Normalised response shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub body: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    /// The request that produced this response.
    pub config: RequestConfig,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        http::header_value(&self.headers, name)
    }
}

/// A request/response exchange with the other side of the bridge.
///
/// The dispatcher and publisher are generic over this so tests can stand in
/// for the native shell without opening sockets.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, config: RequestConfig) -> impl Future<Output = Result<Response>> + Send;
}

/// Production transport: minimal HTTP/1.1 over a loopback TCP socket.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    io_timeout: Duration,
    max_body: usize,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(DEFAULT_IO_TIMEOUT, DEFAULT_MAX_BODY)
    }
}

impl LoopbackTransport {
    pub fn new(io_timeout: Duration, max_body: usize) -> Self {
        Self {
            io_timeout,
            max_body,
        }
    }

    pub fn from_config(config: &shellbridge_core::BridgeConfig) -> Self {
        Self::new(config.transport_timeout(), config.max_body_bytes)
    }

    async fn exchange(&self, url: &LoopbackUrl, config: &RequestConfig) -> Result<http::Message> {
        let addr = url.socket_addr();
        let method = config.effective_method();
        let bytes = http::encode_request(&method, url, &config.headers, config.effective_body())?;

        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| BridgeError::Transport(format!("connect {addr}: {e}")))?;

        stream
            .write_all(&bytes)
            .await
            .map_err(|e| BridgeError::Transport(format!("write to {addr}: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| BridgeError::Transport(format!("flush {addr}: {e}")))?;

        http::read_message(&mut stream, self.max_body).await
    }
}

impl Transport for LoopbackTransport {
    #[instrument(skip(self, config), fields(url = %config.url))]
    async fn send(&self, config: RequestConfig) -> Result<Response> {
        let url = LoopbackUrl::parse(&config.url)?;
        let method = config.effective_method();

        debug!(%method, bytes = config.effective_body().len(), "sending loopback request");

        let message = tokio::time::timeout(self.io_timeout, self.exchange(&url, &config))
            .await
            .map_err(|_| {
                BridgeError::Transport(format!(
                    "exchange with {url} timed out after {}ms",
                    self.io_timeout.as_millis()
                ))
            })??;

        let status = message
            .start_line
            .get(1)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| {
                BridgeError::Transport(format!("bad status line: {}", message.start_line.join(" ")))
            })?;
        let status_text = message.start_line.get(2).cloned().unwrap_or_default();
        let body = String::from_utf8(message.body)
            .map_err(|e| BridgeError::Transport(format!("response body is not UTF-8: {e}")))?;

        debug!(status, bytes = body.len(), "loopback response received");

        Ok(Response {
            body,
            status,
            status_text,
            headers: message.headers,
            config,
        })
    }
}
