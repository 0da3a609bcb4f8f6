// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shellbridge -- Core types and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod loopback;
pub mod types;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use loopback::LoopbackUrl;
pub use types::*;
