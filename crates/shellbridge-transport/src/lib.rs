// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shellbridge Transport -- the loopback exchange both bridge channels ride on.
// `client` is the transport adapter used by the hosted runtime, `server` the
// accept loop behind every bridge endpoint, and `http` the framing they share.

pub mod client;
pub mod http;
pub mod server;

pub use client::{LoopbackTransport, RequestConfig, Response, Transport};
pub use server::{LoopbackServer, RequestHandler, ServerReply, ServerRequest};
