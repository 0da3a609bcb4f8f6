// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Wire types exchanged between the hosted runtime and the native shell.
//
// Everything here is plain data with explicit JSON (de)serialization.  The
// decode helpers enforce the shape invariants so that code past the decode
// boundary never has to re-check them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// Ordered string → JSON value mapping used for parameters and payloads.
pub type Payload = Map<String, Value>;

/// Opaque token matching a call response to its originating request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Call channel
// ---------------------------------------------------------------------------

/// A request to run a named native function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Dotted native function name, e.g. `Biometric.Authenticate`.
    pub function: String,
    /// Parameters in caller order.
    #[serde(default)]
    pub parameters: Payload,
    pub correlation_id: CorrelationId,
    pub issued_at: DateTime<Utc>,
}

impl CallRequest {
    /// Build a request with a fresh correlation id.
    ///
    /// Fails with `MalformedCall` when `function` is empty.
    pub fn new(function: impl Into<String>, parameters: Payload) -> Result<Self> {
        let request = Self {
            function: function.into(),
            parameters,
            correlation_id: CorrelationId::new(),
            issued_at: Utc::now(),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.function.trim().is_empty() {
            return Err(BridgeError::MalformedCall("function name is empty".into()));
        }
        if self.correlation_id.as_str().is_empty() {
            return Err(BridgeError::MalformedCall("correlation id is empty".into()));
        }
        Ok(())
    }

    /// Decode and validate a request body received by the native side.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let request: Self = serde_json::from_slice(body)
            .map_err(|e| BridgeError::MalformedCall(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }
}

/// The native side's answer to a [`CallRequest`].
///
/// Exactly one of `result` / `error` is populated, matching `success`.  Use
/// [`CallResponse::success`] and [`CallResponse::failure`] to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    pub correlation_id: CorrelationId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallResponse {
    /// A successful answer carrying `result`.
    pub fn success(correlation_id: CorrelationId, result: Payload) -> Self {
        Self {
            correlation_id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// A failed answer; `message` becomes the caller's `Remote` error.
    pub fn failure(correlation_id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }

    /// Check the result/error exclusivity invariant.
    pub fn validate(&self) -> Result<()> {
        match (self.success, &self.result, &self.error) {
            (true, Some(_), None) | (false, None, Some(_)) => Ok(()),
            (true, _, _) => Err(BridgeError::MalformedCall(
                "successful response must carry a result and no error".into(),
            )),
            (false, _, _) => Err(BridgeError::MalformedCall(
                "failed response must carry an error and no result".into(),
            )),
        }
    }

    /// Decode and validate a response body received by the hosted side.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let response: Self = serde_json::from_slice(body)
            .map_err(|e| BridgeError::MalformedCall(e.to_string()))?;
        response.validate()?;
        Ok(response)
    }

    /// Collapse into the result payload or the remote error message.
    pub fn into_result(self) -> std::result::Result<Payload, String> {
        match (self.success, self.result, self.error) {
            (true, Some(result), _) => Ok(result),
            (_, _, Some(error)) => Err(error),
            (true, None, None) => Ok(Payload::new()),
            (false, _, None) => Err("native side reported failure without a message".into()),
        }
    }
}

/// Lifecycle of a single call as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    Created,
    Sent,
    Resolved,
    Failed,
    TimedOut,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Failed | Self::TimedOut)
    }
}

// ---------------------------------------------------------------------------
// Event ingress
// ---------------------------------------------------------------------------

/// An event pushed by the native shell into the hosted runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeEvent {
    pub name: String,
    #[serde(default)]
    pub payload: Payload,
    /// Links the event to the call that triggered it, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Free-form origin tag (e.g. the native component that fired it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl NativeEvent {
    pub fn new(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            payload,
            correlation_id: None,
            source: None,
        }
    }

    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Decode an ingress body; anything without a non-empty name is malformed.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let event: Self = serde_json::from_slice(body)
            .map_err(|e| BridgeError::MalformedEvent(e.to_string()))?;
        if event.name.trim().is_empty() {
            return Err(BridgeError::MalformedEvent("event name is empty".into()));
        }
        Ok(event)
    }
}

/// Body returned by the ingress endpoint once an event has been delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAck {
    pub ok: bool,
    /// Namespaced event name the event was delivered under.
    pub event: String,
    /// How many bindings were invoked (regardless of their outcome).
    pub delivered: usize,
}

/// Identity of a listener: the receiving component and its method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerRef {
    pub target: String,
    pub method: String,
}

impl HandlerRef {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
        }
    }
}

impl std::fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.target, self.method)
    }
}

/// Lifecycle of a loopback server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

// ---------------------------------------------------------------------------
// UI state
// ---------------------------------------------------------------------------

/// Observable state of a UI component, captured at the end of a request cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiSnapshot {
    pub component: String,
    pub state: Payload,
    /// Assigned by the publisher; lets the shell drop out-of-order pushes.
    #[serde(default)]
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    /// SHA-256 of the serialized state, lowercase hex.
    pub fingerprint: String,
}

impl UiSnapshot {
    pub fn capture(component: impl Into<String>, state: Payload) -> Self {
        let fingerprint = fingerprint(&state);
        Self {
            component: component.into(),
            state,
            sequence: 0,
            captured_at: Utc::now(),
            fingerprint,
        }
    }
}

/// Hash a payload's canonical JSON form.
pub fn fingerprint(state: &Payload) -> String {
    let bytes = serde_json::to_vec(state).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn call_request_rejects_empty_function() {
        let err = CallRequest::new("  ", Payload::new()).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedCall(_)));
    }

    #[test]
    fn call_request_keeps_parameter_order() {
        let mut params = Payload::new();
        params.insert("zeta".into(), json!(1));
        params.insert("alpha".into(), json!(2));
        let request = CallRequest::new("Dialog.Alert", params).unwrap();

        let encoded = serde_json::to_vec(&request).unwrap();
        let decoded = CallRequest::decode(&encoded).unwrap();
        let keys: Vec<_> = decoded.parameters.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn fresh_correlation_ids_differ() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn success_response_has_result_only() {
        let response = CallResponse::success("abc".into(), payload(json!({"id": "abc"})));
        assert!(response.validate().is_ok());
        assert!(response.error.is_none());

        let wire = serde_json::to_value(&response).unwrap();
        assert!(wire.get("error").is_none());
    }

    #[test]
    fn failure_response_has_error_only() {
        let response = CallResponse::failure("abc".into(), "denied");
        assert!(response.validate().is_ok());
        assert!(response.result.is_none());
        assert_eq!(response.into_result(), Err("denied".to_string()));
    }

    #[test]
    fn decode_rejects_success_with_error() {
        let body = br#"{"correlation_id":"x","success":true,"result":{},"error":"boom"}"#;
        assert!(matches!(
            CallResponse::decode(body),
            Err(BridgeError::MalformedCall(_))
        ));
    }

    #[test]
    fn decode_rejects_failure_without_message() {
        let body = br#"{"correlation_id":"x","success":false}"#;
        assert!(CallResponse::decode(body).is_err());
    }

    #[test]
    fn event_without_name_is_malformed() {
        let err = NativeEvent::decode(br#"{"payload":{"a":1}}"#).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedEvent(_)));

        let err = NativeEvent::decode(br#"{"name":""}"#).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedEvent(_)));
    }

    #[test]
    fn event_payload_defaults_to_empty() {
        let event = NativeEvent::decode(br#"{"name":"PushNotifications.TokenGenerated"}"#).unwrap();
        assert!(event.payload.is_empty());
        assert!(event.correlation_id.is_none());
    }

    #[test]
    fn snapshot_fingerprint_tracks_state() {
        let a = UiSnapshot::capture("Counter", payload(json!({"count": 1})));
        let b = UiSnapshot::capture("Counter", payload(json!({"count": 1})));
        let c = UiSnapshot::capture("Counter", payload(json!({"count": 2})));
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn terminal_states() {
        assert!(!CallState::Created.is_terminal());
        assert!(!CallState::Sent.is_terminal());
        assert!(CallState::Resolved.is_terminal());
        assert!(CallState::Failed.is_terminal());
        assert!(CallState::TimedOut.is_terminal());
    }
}
