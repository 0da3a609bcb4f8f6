// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shellbridge Hosted -- the hosted runtime's half of the bridge.
//
// `dispatcher` invokes native functions over the call channel, `ingress` and
// `registry` receive and fan out native events, and `publisher` pushes UI
// state back to the shell after each request cycle.

pub mod dispatcher;
pub mod ingress;
pub mod publisher;
pub mod registry;

pub use dispatcher::CallDispatcher;
pub use ingress::{EventIngress, IngressServer};
pub use publisher::{SnapshotSource, UiStateMiddleware, UiStatePublisher};
pub use registry::{
    EventSubscriber, Listener, ListenerBinding, ListenerOutcome, ListenerRegistry, Registration,
    Subscription, namespaced,
};
