// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shellbridge -- runtime harness.
//
// Entry point. Initialises logging, brings up the native host and the event
// ingress on loopback, exercises each channel once, then idles until Ctrl-C.

mod services;
mod state;

use serde_json::json;
use tracing::{error, info, warn};

use shellbridge_core::config::CONFIG_FILE;
use shellbridge_core::error::Result;
use shellbridge_core::types::{NativeEvent, Payload};
use shellbridge_native::platform_functions;

use services::bridge_services::BridgeServices;
use state::HomeState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Shellbridge starting");

    if let Err(e) = run().await {
        error!(error = %e, "shellbridge failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let services = BridgeServices::init(platform_functions())?;
    if !services.data_dir().join(CONFIG_FILE).exists() {
        services.persist_config()?;
        info!(path = %services.data_dir().display(), "wrote default configuration");
    }
    info!(native = %services.config().native_base_url, ingress_port = services.config().ingress_port, "configuration loaded");
    services.start().await?;

    let home = HomeState::new();
    let bound = services.subscribe(&home);
    info!(bindings = bound.len(), total = services.registry().len(), "listeners registered");

    demo(&services, &home).await;

    info!("bridge running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    services.shutdown().await;
    Ok(())
}

/// One pass over every channel so a fresh install shows the bridge working.
async fn demo(services: &BridgeServices, home: &HomeState) {
    // Call channel.
    match services.call("System.Info", Payload::new()).await {
        Ok(system) => info!(?system, "System.Info answered"),
        Err(e) => warn!(error = %e, "System.Info failed"),
    }
    if let Err(e) = services.call("Biometric.Authenticate", Payload::new()).await {
        warn!(error = %e, "Biometric.Authenticate unavailable");
    }

    // Event ingress.
    let token = json!({ "token": "demo-push-token" });
    let event = NativeEvent::new(
        "PushNotifications.TokenGenerated",
        token.as_object().cloned().unwrap_or_default(),
    )
    .with_source("shellbridge-demo");
    match services.emit(&event).await {
        Ok(ack) => info!(event = %ack.event, delivered = ack.delivered, "event acknowledged"),
        Err(e) => warn!(error = %e, "event emit failed"),
    }

    // UI state publish.
    match services.ui_state_middleware(home.clone()) {
        Ok(middleware) => {
            let status = middleware.run_cycle(async { 200_u16 }).await;
            middleware.flush().await;
            let published = services.last_published_snapshot().await;
            info!(
                status,
                sequence = ?published.as_ref().map(|s| s.sequence),
                events_seen = home.events_seen(),
                push_token = ?home.push_token(),
                "request cycle complete"
            );
        }
        Err(e) => warn!(error = %e, "ui state middleware unavailable"),
    }
}
