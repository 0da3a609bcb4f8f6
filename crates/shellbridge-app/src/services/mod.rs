// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer -- owns the bridge endpoints for the lifetime of the process.

pub mod bridge_services;
pub mod data_dir;
