// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Listener registry -- maps namespaced event names to ordered handler lists.
//
// The registry is built explicitly at startup (construct empty, then
// `register` or `subscribe_all`) and shared by `Arc` with the ingress
// endpoint.  Bindings live for the lifetime of the registry; there is no
// unregister.
//
// Dispatch runs every handler bound to the event in registration order.  A
// handler that returns an error or panics is reported in its outcome and
// does not stop the others.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use shellbridge_core::error::Result;
use shellbridge_core::types::{HandlerRef, NativeEvent};

/// Prefix every native event name is registered and dispatched under.
pub const NAMESPACE_PREFIX: &str = "native:";

/// Qualify an event name with [`NAMESPACE_PREFIX`].  Idempotent.
pub fn namespaced(event: &str) -> String {
    if event.starts_with(NAMESPACE_PREFIX) {
        event.to_owned()
    } else {
        format!("{NAMESPACE_PREFIX}{event}")
    }
}

/// Something that reacts to native events.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &NativeEvent) -> Result<()>;
}

impl<F> Listener for F
where
    F: Fn(&NativeEvent) -> Result<()> + Send + Sync,
{
    fn on_event(&self, event: &NativeEvent) -> Result<()> {
        self(event)
    }
}

/// One event -> handler association.
#[derive(Clone)]
pub struct ListenerBinding {
    /// Namespaced event name.
    pub event: String,
    pub handler: HandlerRef,
    pub repeatable: bool,
    listener: Arc<dyn Listener>,
}

impl fmt::Debug for ListenerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBinding")
            .field("event", &self.event)
            .field("handler", &self.handler)
            .field("repeatable", &self.repeatable)
            .finish_non_exhaustive()
    }
}

/// Result of a [`ListenerRegistry::register`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Bound,
    /// The handler was already bound to this event and the new binding is
    /// not repeatable; nothing was added.
    Duplicate,
}

/// What happened when one handler saw an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOutcome {
    pub handler: HandlerRef,
    pub result: std::result::Result<(), String>,
}

impl ListenerOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Declarative registration record.
pub struct Subscription {
    event: String,
    handler: HandlerRef,
    repeatable: bool,
    listener: Arc<dyn Listener>,
}

impl Subscription {
    pub fn new(event: &str, handler: HandlerRef, listener: impl Listener + 'static) -> Self {
        Self {
            event: namespaced(event),
            handler,
            repeatable: false,
            listener: Arc::new(listener),
        }
    }

    pub fn repeatable(mut self) -> Self {
        self.repeatable = true;
        self
    }
}

/// Components that contribute subscriptions at startup.
pub trait EventSubscriber {
    fn subscriptions(&self) -> Vec<Subscription>;
}

/// Process-scoped event name -> bindings table.
#[derive(Default)]
pub struct ListenerRegistry {
    bindings: RwLock<HashMap<String, Vec<ListenerBinding>>>,
}

impl ListenerRegistry {
    /// An empty registry; every event dispatches to zero handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `listener` to `event` under the identity `handler`.
    pub fn register(
        &self,
        event: &str,
        handler: HandlerRef,
        repeatable: bool,
        listener: impl Listener + 'static,
    ) -> Registration {
        self.insert(namespaced(event), handler, repeatable, Arc::new(listener))
    }

    fn insert(
        &self,
        event: String,
        handler: HandlerRef,
        repeatable: bool,
        listener: Arc<dyn Listener>,
    ) -> Registration {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let list = bindings.entry(event.clone()).or_default();

        if !repeatable && list.iter().any(|b| b.handler == handler) {
            warn!(%event, %handler, "duplicate non-repeatable binding rejected");
            return Registration::Duplicate;
        }

        debug!(%event, %handler, repeatable, position = list.len(), "listener bound");
        list.push(ListenerBinding {
            event,
            handler,
            repeatable,
            listener,
        });
        Registration::Bound
    }

    /// Register every subscription, returning one [`Registration`] each.
    pub fn subscribe_all(&self, subscriptions: impl IntoIterator<Item = Subscription>) -> Vec<Registration> {
        subscriptions
            .into_iter()
            .map(|s| self.insert(s.event, s.handler, s.repeatable, s.listener))
            .collect()
    }

    /// Register everything a component contributes.
    pub fn subscribe(&self, subscriber: &dyn EventSubscriber) -> Vec<Registration> {
        self.subscribe_all(subscriber.subscriptions())
    }

    /// Bindings for `event` in dispatch order.
    pub fn bindings_for(&self, event: &str) -> Vec<ListenerBinding> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.get(&namespaced(event)).cloned().unwrap_or_default()
    }

    /// Total number of bindings across all events.
    pub fn len(&self) -> usize {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every handler bound to its namespaced name.
    ///
    /// Handlers run on the calling thread, outside the registry lock.
    pub fn dispatch(&self, event: &NativeEvent) -> Vec<ListenerOutcome> {
        let name = namespaced(&event.name);
        let bindings = self.bindings_for(&name);

        if bindings.is_empty() {
            debug!(event = %name, "no listeners bound");
            return Vec::new();
        }

        let outcomes: Vec<ListenerOutcome> = bindings
            .iter()
            .map(|binding| {
                let result = match catch_unwind(AssertUnwindSafe(|| binding.listener.on_event(event))) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(panic) => Err(panic_message(panic.as_ref())),
                };
                if let Err(message) = &result {
                    warn!(event = %name, handler = %binding.handler, error = %message, "listener failed");
                }
                ListenerOutcome {
                    handler: binding.handler.clone(),
                    result,
                }
            })
            .collect();

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        info!(event = %name, delivered = outcomes.len(), failed, "event dispatched");
        outcomes
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("listener panicked: {s}")
    } else {
        "listener panicked".into()
    }
}
