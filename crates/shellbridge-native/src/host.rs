// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Native host -- the shell's side of the call and UI-state channels.
//
// Routes:
//   POST /_native/api/call      CallRequest -> CallResponse
//   POST /_native/api/ui-state  UiSnapshot  -> {"ok":true,"sequence":n,"applied":bool}
//
// Status codes on the call route: 400 when the request does not decode, 404
// when no function has the requested name, 200 with a `CallResponse`
// otherwise (including functions that fail).

use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use shellbridge_core::error::Result;
use shellbridge_core::loopback::{CALL_PATH, LoopbackUrl, NATIVE_SCHEME, UI_STATE_PATH};
use shellbridge_core::types::{CallRequest, CallResponse, UiSnapshot};
use shellbridge_transport::server::{LoopbackServer, RequestHandler, ServerReply, ServerRequest};

use crate::traits::FunctionTable;

/// Request handler behind [`NativeHost`].
pub struct HostHandler {
    functions: FunctionTable,
    last_snapshot: Mutex<Option<UiSnapshot>>,
    calls_served: AtomicU64,
}

impl HostHandler {
    pub fn new(functions: FunctionTable) -> Self {
        Self {
            functions,
            last_snapshot: Mutex::new(None),
            calls_served: AtomicU64::new(0),
        }
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Most recent snapshot accepted on the UI-state route.
    pub fn last_snapshot(&self) -> Option<UiSnapshot> {
        self.last_snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_served(&self) -> u64 {
        self.calls_served.load(Ordering::Relaxed)
    }

    fn handle_call(&self, body: &[u8]) -> ServerReply {
        let request = match CallRequest::decode(body) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "rejecting malformed call");
                return ServerReply::error(400, &e.to_string());
            }
        };

        let Some(function) = self.functions.get(&request.function) else {
            warn!(function = %request.function, "unknown native function");
            return ServerReply::error(404, &format!("no native function named {}", request.function));
        };

        self.calls_served.fetch_add(1, Ordering::Relaxed);
        let id = request.correlation_id;
        let response = match catch_unwind(AssertUnwindSafe(|| function.call(&request.parameters))) {
            Ok(Ok(result)) => CallResponse::success(id, result),
            Ok(Err(e)) => CallResponse::failure(id, e.to_string()),
            Err(_) => CallResponse::failure(id, format!("native function {} panicked", request.function)),
        };

        debug!(
            function = %request.function,
            correlation_id = %response.correlation_id,
            success = response.success,
            "native call answered"
        );
        ServerReply::json(200, &response)
    }

    fn handle_ui_state(&self, body: &[u8]) -> ServerReply {
        let snapshot: UiSnapshot = match serde_json::from_slice(body) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "rejecting malformed ui snapshot");
                return ServerReply::error(400, &format!("malformed ui snapshot: {e}"));
            }
        };

        let sequence = snapshot.sequence;
        let mut last = self.last_snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        // Sequence 0 means the sender does not number its snapshots.
        let applied = match last.as_ref() {
            Some(previous) => sequence == 0 || sequence > previous.sequence,
            None => true,
        };
        if applied {
            debug!(component = %snapshot.component, sequence, "ui snapshot applied");
            *last = Some(snapshot);
        } else {
            debug!(component = %snapshot.component, sequence, "stale ui snapshot skipped");
        }

        ServerReply::json(200, &json!({ "ok": true, "sequence": sequence, "applied": applied }))
    }
}

impl RequestHandler for HostHandler {
    async fn handle(&self, request: ServerRequest) -> ServerReply {
        let route = match request.path.as_str() {
            CALL_PATH => Self::handle_call,
            UI_STATE_PATH => Self::handle_ui_state,
            other => return ServerReply::not_found(other),
        };
        if request.method != "POST" {
            return ServerReply::method_not_allowed(&request.method);
        }
        route(self, &request.body)
    }
}

/// The shell's loopback endpoint.
pub struct NativeHost {
    handler: Arc<HostHandler>,
    server: LoopbackServer,
}

impl NativeHost {
    pub fn new(functions: FunctionTable, port: u16) -> Self {
        Self {
            handler: Arc::new(HostHandler::new(functions)),
            server: LoopbackServer::new(port),
        }
    }

    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.server = self.server.with_max_body(max_body);
        self
    }

    #[instrument(skip(self), fields(functions = self.handler.functions().len()))]
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = self.server.start(Arc::clone(&self.handler)).await?;
        info!(%addr, "native host listening");
        Ok(addr)
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.server.stop().await
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// `native://127.0.0.1:<port>` for the running host.
    pub fn base_url(&self) -> Result<LoopbackUrl> {
        LoopbackUrl::parse(&format!("{NATIVE_SCHEME}://127.0.0.1:{}", self.port()))
    }

    pub fn handler(&self) -> &Arc<HostHandler> {
        &self.handler
    }

    pub fn last_snapshot(&self) -> Option<UiSnapshot> {
        self.handler.last_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellbridge_core::error::BridgeError;
    use shellbridge_core::types::{CorrelationId, Payload};

    fn handler() -> HostHandler {
        let mut table = crate::stub::stub_functions();
        table.register("Biometric.Authenticate", |_: &Payload| -> Result<Payload> {
            let mut out = Payload::new();
            out.insert("id".into(), "abc".into());
            Ok(out)
        });
        table.register("Broken.Panic", |_: &Payload| -> Result<Payload> { panic!("native crash") });
        HostHandler::new(table)
    }

    fn post(path: &str, body: Vec<u8>) -> ServerRequest {
        ServerRequest {
            method: "POST".into(),
            path: path.into(),
            headers: Vec::new(),
            body,
            peer: ([127, 0, 0, 1], 1).into(),
        }
    }

    fn call_body(function: &str) -> (CorrelationId, Vec<u8>) {
        let request = CallRequest::new(function, Payload::new()).unwrap();
        (request.correlation_id.clone(), serde_json::to_vec(&request).unwrap())
    }

    #[tokio::test]
    async fn response_echoes_correlation_id() {
        let handler = handler();
        let (id, body) = call_body("Biometric.Authenticate");
        let reply = handler.handle(post(CALL_PATH, body)).await;
        assert_eq!(reply.status, 200);

        let response = CallResponse::decode(&reply.body).unwrap();
        assert_eq!(response.correlation_id, id);
        assert_eq!(response.result.unwrap()["id"], "abc");
        assert_eq!(handler.calls_served(), 1);
    }

    #[tokio::test]
    async fn failing_function_is_success_false() {
        let handler = handler();
        let (id, body) = call_body("Camera.GetPhoto");
        let reply = handler.handle(post(CALL_PATH, body)).await;
        assert_eq!(reply.status, 200);

        let response = CallResponse::decode(&reply.body).unwrap();
        assert_eq!(response.correlation_id, id);
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some(BridgeError::PlatformUnavailable.to_string().as_str()));
    }

    #[tokio::test]
    async fn panicking_function_is_contained() {
        let handler = handler();
        let (_, body) = call_body("Broken.Panic");
        let response = CallResponse::decode(&handler.handle(post(CALL_PATH, body)).await.body).unwrap();
        assert!(!response.success);
        assert!(response.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn unknown_function_is_404_and_garbage_is_400() {
        let handler = handler();
        let (_, body) = call_body("Teleport.Now");
        assert_eq!(handler.handle(post(CALL_PATH, body)).await.status, 404);
        assert_eq!(handler.handle(post(CALL_PATH, b"{".to_vec())).await.status, 400);
        assert_eq!(handler.calls_served(), 0);
    }

    #[tokio::test]
    async fn only_post_on_known_routes() {
        let handler = handler();
        let mut request = post(CALL_PATH, Vec::new());
        request.method = "GET".into();
        assert_eq!(handler.handle(request).await.status, 405);
        assert_eq!(handler.handle(post("/other", Vec::new())).await.status, 404);
    }

    #[tokio::test]
    async fn stale_snapshots_are_skipped() {
        let handler = handler();
        let mut snapshot = UiSnapshot::capture("Counter", Payload::new());

        snapshot.sequence = 2;
        let reply = handler.handle(post(UI_STATE_PATH, serde_json::to_vec(&snapshot).unwrap())).await;
        assert_eq!(reply.status, 200);

        snapshot.sequence = 1;
        let reply = handler.handle(post(UI_STATE_PATH, serde_json::to_vec(&snapshot).unwrap())).await;
        let ack: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(ack["applied"], false);
        assert_eq!(handler.last_snapshot().unwrap().sequence, 2);

        let reply = handler.handle(post(UI_STATE_PATH, b"[]".to_vec())).await;
        assert_eq!(reply.status, 400);
    }
}
