// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Native capability abstraction.
//
// The shell exposes device capabilities as named functions (`Camera.GetPhoto`,
// `Biometric.Authenticate`, ...) taking and returning JSON maps.  Platform
// code registers one `NativeFunction` per name in a `FunctionTable`; the
// call endpoint looks functions up by the name in each `CallRequest`.

use std::collections::BTreeMap;
use std::sync::Arc;

use shellbridge_core::error::Result;
use shellbridge_core::types::Payload;

/// A single named native capability.
///
/// Implementations run synchronously on the connection task.  Returning an
/// error produces a `success: false` response carrying its message.
pub trait NativeFunction: Send + Sync {
    fn call(&self, parameters: &Payload) -> Result<Payload>;
}

impl<F> NativeFunction for F
where
    F: Fn(&Payload) -> Result<Payload> + Send + Sync,
{
    fn call(&self, parameters: &Payload) -> Result<Payload> {
        self(parameters)
    }
}

/// Name -> function lookup served by the call endpoint.
#[derive(Clone, Default)]
pub struct FunctionTable {
    functions: BTreeMap<String, Arc<dyn NativeFunction>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the function registered under `name`.
    pub fn register(&mut self, name: impl Into<String>, function: impl NativeFunction + 'static) -> &mut Self {
        let name = name.into();
        if self.functions.insert(name.clone(), Arc::new(function)).is_some() {
            tracing::debug!(%name, "native function replaced");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NativeFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_and_call() {
        let mut table = FunctionTable::new();
        table.register("Echo.Back", |p: &Payload| -> Result<Payload> { Ok(p.clone()) });

        let mut params = Payload::new();
        params.insert("x".into(), json!(1));
        let out = table.get("Echo.Back").unwrap().call(&params).unwrap();
        assert_eq!(out, params);
        assert!(table.get("Echo.Missing").is_none());
    }

    #[test]
    fn re_register_replaces() {
        let mut table = FunctionTable::new();
        table
            .register("A", |_: &Payload| -> Result<Payload> { Ok(Payload::new()) })
            .register("A", |_: &Payload| -> Result<Payload> {
                Err(shellbridge_core::BridgeError::PlatformUnavailable)
            });
        assert_eq!(table.len(), 1);
        assert!(table.get("A").unwrap().call(&Payload::new()).is_err());
    }
}
