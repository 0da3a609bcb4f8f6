// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event ingress -- the hosted runtime's endpoint for events pushed by the
// native shell.
//
// A body that does not decode to a named `NativeEvent` is dropped with a
// warning and never reaches the registry.  A valid event is dispatched
// synchronously; the acknowledgement reports delivery, not handler outcomes.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use shellbridge_core::error::Result;
use shellbridge_core::loopback::EVENTS_PATH;
use shellbridge_core::types::{EventAck, NativeEvent};
use shellbridge_transport::server::{LoopbackServer, RequestHandler, ServerReply, ServerRequest};

use crate::registry::{ListenerRegistry, namespaced};

/// Decodes event bodies and hands them to the registry.
#[derive(Clone)]
pub struct EventIngress {
    registry: Arc<ListenerRegistry>,
}

impl EventIngress {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Accept one raw event body.
    ///
    /// # Errors
    ///
    /// `MalformedEvent` when the body is not a JSON event with a name.
    pub fn receive(&self, body: &[u8]) -> Result<EventAck> {
        let event = NativeEvent::decode(body).inspect_err(|e| {
            warn!(error = %e, bytes = body.len(), "dropping malformed event");
        })?;

        let outcomes = self.registry.dispatch(&event);
        Ok(EventAck {
            ok: true,
            event: namespaced(&event.name),
            delivered: outcomes.len(),
        })
    }
}

impl RequestHandler for EventIngress {
    async fn handle(&self, request: ServerRequest) -> ServerReply {
        if request.path != EVENTS_PATH {
            return ServerReply::not_found(&request.path);
        }
        if request.method != "POST" {
            return ServerReply::method_not_allowed(&request.method);
        }

        match self.receive(&request.body) {
            Ok(ack) => ServerReply::json(200, &ack),
            Err(e) => ServerReply::error(400, &e.to_string()),
        }
    }
}

/// [`EventIngress`] exposed on a loopback port.
pub struct IngressServer {
    ingress: Arc<EventIngress>,
    server: LoopbackServer,
}

impl IngressServer {
    pub fn new(registry: Arc<ListenerRegistry>, port: u16) -> Self {
        Self {
            ingress: Arc::new(EventIngress::new(registry)),
            server: LoopbackServer::new(port),
        }
    }

    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.server = self.server.with_max_body(max_body);
        self
    }

    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = self.server.start(Arc::clone(&self.ingress)).await?;
        info!(%addr, path = EVENTS_PATH, "event ingress listening");
        Ok(addr)
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.server.stop().await
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }
}
