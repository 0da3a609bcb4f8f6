// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer -- builds both halves of the bridge from one
// `BridgeConfig` and owns them until shutdown.
//
// The native host and ingress server are behind `tokio::sync::Mutex` because
// start/stop are async and take `&mut self`.  Everything else is shared by
// `Arc` and cheap to clone.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use shellbridge_core::error::Result;
use shellbridge_core::loopback::{LoopbackUrl, NATIVE_SCHEME};
use shellbridge_core::types::{EventAck, NativeEvent, Payload};
use shellbridge_core::BridgeConfig;
use shellbridge_hosted::{
    CallDispatcher, EventSubscriber, IngressServer, ListenerRegistry, Registration, SnapshotSource,
    UiStateMiddleware,
};
use shellbridge_native::{EventEmitter, FunctionTable, NativeHost};
use shellbridge_transport::client::LoopbackTransport;

use super::data_dir;

#[derive(Clone)]
pub struct BridgeServices {
    config: BridgeConfig,
    data_dir: PathBuf,
    transport: Arc<LoopbackTransport>,
    registry: Arc<ListenerRegistry>,
    dispatcher: CallDispatcher<LoopbackTransport>,
    native_host: Arc<tokio::sync::Mutex<NativeHost>>,
    ingress: Arc<tokio::sync::Mutex<IngressServer>>,
}

impl BridgeServices {
    /// Initialise from the platform data directory.  Call once at startup.
    pub fn init(functions: FunctionTable) -> Result<Self> {
        let dir = data_dir::data_dir();
        info!(path = %dir.display(), "initialising bridge services");
        Self::with_data_dir(&dir, functions)
    }

    /// Initialise from `config.json` in `dir` (defaults when absent).
    pub fn with_data_dir(dir: &Path, functions: FunctionTable) -> Result<Self> {
        let config = BridgeConfig::load_or_default(dir);
        Self::from_config(config, functions, dir)
    }

    /// Build from an explicit configuration; `dir` is where it persists.
    pub fn from_config(config: BridgeConfig, functions: FunctionTable, dir: &Path) -> Result<Self> {
        config.validate()?;
        let native_base = config.native_base()?;

        let transport = LoopbackTransport::from_config(&config);
        let dispatcher =
            CallDispatcher::new(transport.clone(), &native_base).with_timeout(config.call_timeout());
        let registry = Arc::new(ListenerRegistry::new());

        let native_host = NativeHost::new(functions, native_base.port()).with_max_body(config.max_body_bytes);
        let ingress =
            IngressServer::new(Arc::clone(&registry), config.ingress_port).with_max_body(config.max_body_bytes);

        Ok(Self {
            data_dir: dir.to_path_buf(),
            transport: Arc::new(transport),
            registry,
            dispatcher,
            native_host: Arc::new(tokio::sync::Mutex::new(native_host)),
            ingress: Arc::new(tokio::sync::Mutex::new(ingress)),
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Persist the active configuration to the data directory.
    pub fn persist_config(&self) -> Result<()> {
        self.config.persist(&self.data_dir)
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Bring up the native host and the event ingress.
    pub async fn start(&self) -> Result<()> {
        let native_addr = self.native_host.lock().await.start().await?;
        let ingress_addr = self.ingress.lock().await.start().await?;
        info!(native = %native_addr, ingress = %ingress_addr, "bridge endpoints up");
        Ok(())
    }

    /// Stop both endpoints.  Errors are logged; shutdown always completes.
    pub async fn shutdown(&self) {
        if let Err(e) = self.ingress.lock().await.stop().await {
            warn!(error = %e, "event ingress did not stop cleanly");
        }
        if let Err(e) = self.native_host.lock().await.stop().await {
            warn!(error = %e, "native host did not stop cleanly");
        }
        info!(in_flight = self.dispatcher.in_flight(), "bridge shut down");
    }

    // -- Hosted side ------------------------------------------------------------

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn subscribe(&self, subscriber: &dyn EventSubscriber) -> Vec<Registration> {
        self.registry.subscribe(subscriber)
    }

    pub async fn call(&self, function: &str, parameters: Payload) -> Result<Payload> {
        self.dispatcher.invoke(function, parameters).await
    }

    /// UI-state hook for request cycles, honouring `publish_ui_state`.
    pub fn ui_state_middleware<S: SnapshotSource>(&self, source: S) -> Result<UiStateMiddleware<LoopbackTransport, S>> {
        UiStateMiddleware::from_config(&self.config, Arc::clone(&self.transport), source)
    }

    // -- Native side ------------------------------------------------------------

    /// Push an event into the hosted runtime as the native shell would.
    pub async fn emit(&self, event: &NativeEvent) -> Result<EventAck> {
        let port = self.ingress.lock().await.port();
        let hosted_base = LoopbackUrl::parse(&format!("{NATIVE_SCHEME}://127.0.0.1:{port}"))?;
        EventEmitter::new(Arc::clone(&self.transport), &hosted_base).emit(event).await
    }

    /// Snapshot most recently received by the native host.
    pub async fn last_published_snapshot(&self) -> Option<shellbridge_core::types::UiSnapshot> {
        self.native_host.lock().await.last_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellbridge_core::error::BridgeError;

    fn ephemeral_config() -> BridgeConfig {
        BridgeConfig {
            native_base_url: "native://127.0.0.1:0".into(),
            ingress_port: 0,
            ..Default::default()
        }
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = BridgeConfig {
            native_base_url: "http://example.com".into(),
            ..Default::default()
        };
        assert!(matches!(
            BridgeServices::from_config(config, FunctionTable::new(), &std::env::temp_dir()),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn config_round_trips_through_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let services = BridgeServices::with_data_dir(tmp.path(), FunctionTable::new()).unwrap();
        assert_eq!(services.data_dir(), tmp.path());
        services.persist_config().unwrap();

        let reloaded = BridgeServices::with_data_dir(tmp.path(), FunctionTable::new()).unwrap();
        assert_eq!(reloaded.config().native_base_url, services.config().native_base_url);
    }

    #[tokio::test]
    async fn emit_reaches_registry_through_ingress() {
        let tmp = tempfile::tempdir().unwrap();
        let services = BridgeServices::from_config(ephemeral_config(), FunctionTable::new(), tmp.path()).unwrap();
        services.ingress.lock().await.start().await.unwrap();

        let ack = services
            .emit(&NativeEvent::new("Nobody.Listens", Payload::new()))
            .await
            .unwrap();
        assert_eq!(ack.delivered, 0);

        services.shutdown().await;
    }
}
