// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// UI state publisher -- pushes one component snapshot to the native shell at
// the end of each request cycle.
//
// Publishing is best-effort.  The push runs in its own task, so a slow shell
// never holds back the response the cycle already produced, and a failed
// push is only logged.  Snapshots are not retained or retried; each is
// stamped with a per-publisher sequence number before it is handed off so
// the shell can drop one that arrives after a newer push.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use shellbridge_core::error::{BridgeError, Result};
use shellbridge_core::loopback::{LoopbackUrl, UI_STATE_PATH};
use shellbridge_core::types::UiSnapshot;
use shellbridge_transport::client::{RequestConfig, Transport};

/// Sends snapshots to `<native_base>/_native/api/ui-state`.
pub struct UiStatePublisher<T: Transport> {
    transport: Arc<T>,
    url: String,
    sequence: AtomicU64,
}

impl<T: Transport> UiStatePublisher<T> {
    pub fn new(transport: Arc<T>, native_base: &LoopbackUrl) -> Self {
        Self {
            transport,
            url: native_base.with_path(UI_STATE_PATH).to_string(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Sequence number the next snapshot will carry.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed) + 1
    }

    /// Push `snapshot`, stamping it with the next sequence number.
    ///
    /// # Errors
    ///
    /// `Publish` for any transport failure or non-2xx answer.
    #[instrument(skip(self, snapshot), fields(component = %snapshot.component))]
    pub async fn publish(&self, mut snapshot: UiSnapshot) -> Result<()> {
        self.stamp(&mut snapshot);
        self.deliver(snapshot).await
    }

    fn stamp(&self, snapshot: &mut UiSnapshot) {
        snapshot.sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
    }

    /// Send an already-stamped snapshot.
    async fn deliver(&self, snapshot: UiSnapshot) -> Result<()> {
        let config = RequestConfig::post_json(self.url.clone(), &snapshot)
            .map_err(|e| BridgeError::Publish(e.to_string()))?;
        let response = self
            .transport
            .send(config)
            .await
            .map_err(|e| BridgeError::Publish(e.to_string()))?;

        if !response.is_success() {
            return Err(BridgeError::Publish(format!(
                "native shell answered {} {}",
                response.status, response.status_text
            )));
        }

        debug!(sequence = snapshot.sequence, fingerprint = %snapshot.fingerprint, "ui state published");
        Ok(())
    }
}

/// Captures the current UI state when a request cycle ends.
pub trait SnapshotSource: Send + Sync {
    /// `None` when there is nothing to publish this cycle.
    fn snapshot(&self) -> Option<UiSnapshot>;
}

impl<F> SnapshotSource for F
where
    F: Fn() -> Option<UiSnapshot> + Send + Sync,
{
    fn snapshot(&self) -> Option<UiSnapshot> {
        self()
    }
}

/// Request-cycle hook: publish after the response is computed.
///
/// Dropping the middleware aborts any push still in flight.
pub struct UiStateMiddleware<T: Transport, S: SnapshotSource> {
    publisher: Option<Arc<UiStatePublisher<T>>>,
    source: S,
    in_flight: Mutex<JoinSet<()>>,
}

impl<T: Transport, S: SnapshotSource> UiStateMiddleware<T, S> {
    pub fn new(publisher: UiStatePublisher<T>, source: S) -> Self {
        Self {
            publisher: Some(Arc::new(publisher)),
            source,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    /// A pass-through hook that never publishes.
    pub fn disabled(source: S) -> Self {
        Self {
            publisher: None,
            source,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    /// Build from configuration, honouring `publish_ui_state`.
    pub fn from_config(
        config: &shellbridge_core::BridgeConfig,
        transport: Arc<T>,
        source: S,
    ) -> Result<Self> {
        if !config.publish_ui_state {
            debug!("ui state publishing disabled by configuration");
            return Ok(Self::disabled(source));
        }
        let base = config.native_base()?;
        Ok(Self::new(UiStatePublisher::new(transport, &base), source))
    }

    pub fn is_enabled(&self) -> bool {
        self.publisher.is_some()
    }

    /// Hand the current snapshot off for publishing and return `response`
    /// untouched, without waiting for the shell.
    pub async fn after_response<R>(&self, response: R) -> R {
        let Some(publisher) = &self.publisher else {
            return response;
        };
        let Some(mut snapshot) = self.source.snapshot() else {
            debug!("no ui snapshot this cycle");
            return response;
        };

        // Stamp here so sequence order follows cycle order, not task order.
        publisher.stamp(&mut snapshot);
        let publisher = Arc::clone(publisher);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            if let Err(e) = publisher.deliver(snapshot).await {
                warn!(error = %e, "ui state publish failed; response unaffected");
            }
        });
        response
    }

    /// Wait for every push handed off so far to finish.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(
            &mut *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner),
        );
        while pending.join_next().await.is_some() {}
    }

    /// Run one request cycle: compute the response, then publish.
    pub async fn run_cycle<R, F>(&self, cycle: F) -> R
    where
        F: Future<Output = R>,
    {
        let response = cycle.await;
        self.after_response(response).await
    }
}
