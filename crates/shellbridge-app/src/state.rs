// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Hosted-side demo state -- a "Home" component that listens for native events
// and exposes its state as the UI snapshot for each request cycle.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;

use shellbridge_core::error::{BridgeError, Result};
use shellbridge_core::types::{HandlerRef, NativeEvent, UiSnapshot};
use shellbridge_hosted::{EventSubscriber, SnapshotSource, Subscription};

/// Component name carried in snapshots.
pub const HOME_COMPONENT: &str = "Home";

#[derive(Debug, Default, Clone)]
struct HomeModel {
    push_token: Option<String>,
    authenticated: bool,
    events_seen: u64,
}

/// Shared home-screen state.  Clones share the same model.
#[derive(Debug, Default, Clone)]
pub struct HomeState {
    model: Arc<Mutex<HomeModel>>,
}

impl HomeState {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut HomeModel)) {
        let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        model.events_seen += 1;
        f(&mut model);
    }

    pub fn events_seen(&self) -> u64 {
        self.model.lock().unwrap_or_else(PoisonError::into_inner).events_seen
    }

    pub fn push_token(&self) -> Option<String> {
        self.model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_token
            .clone()
    }
}

impl EventSubscriber for HomeState {
    fn subscriptions(&self) -> Vec<Subscription> {
        let on_token = self.clone();
        let on_auth = self.clone();
        vec![
            Subscription::new(
                "PushNotifications.TokenGenerated",
                HandlerRef::new(HOME_COMPONENT, "store_push_token"),
                move |event: &NativeEvent| -> Result<()> {
                    let token = event
                        .payload
                        .get("token")
                        .and_then(|t| t.as_str())
                        .ok_or_else(|| BridgeError::Listener("token event without a token".into()))?
                        .to_owned();
                    on_token.update(|m| m.push_token = Some(token));
                    Ok(())
                },
            ),
            Subscription::new(
                "Biometric.Completed",
                HandlerRef::new(HOME_COMPONENT, "mark_authenticated"),
                move |event: &NativeEvent| -> Result<()> {
                    let ok = event.payload.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
                    on_auth.update(|m| m.authenticated = ok);
                    Ok(())
                },
            ),
        ]
    }
}

impl SnapshotSource for HomeState {
    fn snapshot(&self) -> Option<UiSnapshot> {
        let model = self.model.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let state = json!({
            "push_token": model.push_token,
            "authenticated": model.authenticated,
            "events_seen": model.events_seen,
        });
        state
            .as_object()
            .cloned()
            .map(|state| UiSnapshot::capture(HOME_COMPONENT, state))
    }
}
