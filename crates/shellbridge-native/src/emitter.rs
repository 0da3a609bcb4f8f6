// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event emitter -- pushes native events to the hosted runtime's ingress.

use std::sync::Arc;

use tracing::{debug, instrument};

use shellbridge_core::error::{BridgeError, Result};
use shellbridge_core::loopback::{EVENTS_PATH, LoopbackUrl};
use shellbridge_core::types::{EventAck, NativeEvent};
use shellbridge_transport::client::{RequestConfig, Transport};

/// Native side of the event channel: posts events to the hosted runtime's
/// ingress endpoint.
pub struct EventEmitter<T: Transport> {
    transport: Arc<T>,
    url: String,
}

impl<T: Transport> EventEmitter<T> {
    /// `hosted_base` is the ingress server's loopback address.
    pub fn new(transport: Arc<T>, hosted_base: &LoopbackUrl) -> Self {
        Self {
            transport,
            url: hosted_base.with_path(EVENTS_PATH).to_string(),
        }
    }

    /// Deliver `event` and return the ingress acknowledgement.
    ///
    /// A 400 from the ingress maps to `MalformedEvent`; any other non-200
    /// answer is a `Transport` error.
    #[instrument(skip(self, event), fields(event = %event.name))]
    pub async fn emit(&self, event: &NativeEvent) -> Result<EventAck> {
        let config = RequestConfig::post_json(self.url.clone(), event)?;
        let response = self.transport.send(config).await?;

        match response.status {
            200 => {
                let ack: EventAck = serde_json::from_str(&response.body)?;
                debug!(delivered = ack.delivered, "event acknowledged");
                Ok(ack)
            }
            400 => Err(BridgeError::MalformedEvent(response.body)),
            status => Err(BridgeError::Transport(format!(
                "ingress answered {status} {}",
                response.status_text
            ))),
        }
    }
}
