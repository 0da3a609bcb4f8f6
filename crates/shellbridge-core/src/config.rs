// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::loopback::LoopbackUrl;

/// File name of the persisted configuration inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Persistent bridge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the native shell's bridge server (loopback only).
    pub native_base_url: String,
    /// Port the hosted runtime's event ingress listens on.
    pub ingress_port: u16,
    /// Bound on how long a call waits for its response.
    pub call_timeout_ms: u64,
    /// Bound on a single connect + request/response exchange.
    pub transport_timeout_ms: u64,
    /// Largest request or response body accepted on the loopback channel.
    pub max_body_bytes: usize,
    /// Push a UI snapshot to the shell after every request cycle.
    pub publish_ui_state: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            native_base_url: "native://127.0.0.1:4580".into(),
            ingress_port: 4581,
            call_timeout_ms: 30_000,
            transport_timeout_ms: 10_000,
            max_body_bytes: 8 * 1024 * 1024,
            publish_ui_state: true,
        }
    }
}

impl BridgeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }

    /// Parsed form of `native_base_url`.
    pub fn native_base(&self) -> Result<LoopbackUrl> {
        LoopbackUrl::parse(&self.native_base_url)
            .map_err(|e| BridgeError::Config(format!("native_base_url: {e}")))
    }

    /// Reject settings the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.native_base()?;
        if self.call_timeout_ms == 0 {
            return Err(BridgeError::Config("call_timeout_ms must be > 0".into()));
        }
        if self.transport_timeout_ms == 0 {
            return Err(BridgeError::Config("transport_timeout_ms must be > 0".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(BridgeError::Config("max_body_bytes must be > 0".into()));
        }
        Ok(())
    }

    /// Load `config.json` from `dir`, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load_or_default(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(_) => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                Self::default()
            }
        }
    }

    /// Write the configuration as pretty JSON into `dir`.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }
}
