// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub capabilities for desktop/CI builds where device APIs are unavailable.
//
// Every device capability answers `PlatformUnavailable`, which reaches the
// hosted side as a `success: false` response.  `System.Info` still answers
// so the call channel can be exercised end to end.

use shellbridge_core::error::{BridgeError, Result};
use shellbridge_core::types::Payload;

use crate::traits::FunctionTable;

/// Platform name reported by `System.Info` on the stub table.
pub const STUB_PLATFORM: &str = "Desktop (stub)";

/// Device capabilities a shell is expected to provide.
pub const STOCK_FUNCTIONS: &[&str] = &[
    "Camera.GetPhoto",
    "Camera.PickImages",
    "Biometric.Authenticate",
    "PushNotifications.GetToken",
    "Dialog.Alert",
];

/// Function table used when no platform table is supplied.
pub fn stub_functions() -> FunctionTable {
    let mut table = FunctionTable::new();
    for &name in STOCK_FUNCTIONS {
        table.register(name, move |_: &Payload| -> Result<Payload> {
            tracing::warn!(function = name, "native function called on stub bridge");
            Err(BridgeError::PlatformUnavailable)
        });
    }
    table.register("System.Info", system_info);
    table
}

fn system_info(_parameters: &Payload) -> Result<Payload> {
    let mut info = Payload::new();
    info.insert("platform".into(), STUB_PLATFORM.into());
    info.insert("os".into(), std::env::consts::OS.into());
    info.insert("arch".into(), std::env::consts::ARCH.into());
    info.insert("version".into(), env!("CARGO_PKG_VERSION").into());
    Ok(info)
}
