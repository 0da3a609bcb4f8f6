// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shellbridge Native -- the shell's half of the bridge.
//
// Platform code supplies a `FunctionTable` of named capabilities; `NativeHost`
// serves it on the call endpoint and accepts UI snapshots, and
// `EventEmitter` pushes events into the hosted runtime.

pub mod emitter;
pub mod host;
pub mod stub;
pub mod traits;

pub use emitter::EventEmitter;
pub use host::{HostHandler, NativeHost};
pub use traits::{FunctionTable, NativeFunction};

/// Function table for the current target.
///
/// Mobile shells register their own capabilities on top of (or instead of)
/// this; desktop and CI builds get the stub table.
pub fn platform_functions() -> FunctionTable {
    stub::stub_functions()
}
