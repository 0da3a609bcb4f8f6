// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Call dispatcher -- invokes named native functions over the call channel.
//
// Every invocation gets a fresh correlation id and an entry in the pending
// table.  The HTTP exchange runs in its own task; whatever `CallResponse` it
// yields is routed back through the table *by correlation id*, so responses
// may complete in any order.  The caller waits on a oneshot with a bounded
// timeout.
//
// # Lifecycle
//
//   Created -> Sent -> { Resolved | Failed | TimedOut }
//
// All three end states are terminal and remove the pending entry.  A
// response arriving for an id that is no longer pending (typically after a
// timeout) is logged and discarded.
//
// # Known limitation
//
// There is no cancellation channel to the native side.  A call that times
// out here is abandoned locally but may still run to completion natively.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use shellbridge_core::error::{BridgeError, Result};
use shellbridge_core::loopback::{CALL_PATH, LoopbackUrl};
use shellbridge_core::types::{CallRequest, CallResponse, CallState, CorrelationId, Payload};
use shellbridge_transport::client::{RequestConfig, Response, Transport};

/// Bound used when none is configured.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// What the exchange task hands back to the waiting caller.
type Outcome = Result<CallResponse>;

/// One in-flight call.
struct PendingCall {
    function: String,
    state: CallState,
    reply: oneshot::Sender<Outcome>,
}

type PendingTable = Mutex<HashMap<CorrelationId, PendingCall>>;

fn lock(table: &PendingTable) -> MutexGuard<'_, HashMap<CorrelationId, PendingCall>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hosted-side entry point for the call channel.
pub struct CallDispatcher<T: Transport> {
    transport: Arc<T>,
    call_url: String,
    timeout: Duration,
    pending: Arc<PendingTable>,
    discarded: Arc<AtomicU64>,
}

impl<T: Transport> Clone for CallDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            call_url: self.call_url.clone(),
            timeout: self.timeout,
            pending: Arc::clone(&self.pending),
            discarded: Arc::clone(&self.discarded),
        }
    }
}

impl<T: Transport> CallDispatcher<T> {
    /// Create a dispatcher posting to `<native_base>/_native/api/call`.
    pub fn new(transport: T, native_base: &LoopbackUrl) -> Self {
        Self {
            transport: Arc::new(transport),
            call_url: native_base.with_path(CALL_PATH).to_string(),
            timeout: DEFAULT_CALL_TIMEOUT,
            pending: Arc::new(Mutex::new(HashMap::new())),
            discarded: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of calls currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Responses dropped because their call was no longer pending.
    pub fn discarded_responses(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Run `function` on the native side and return its result payload.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the shell has no such function
    /// - `Remote` if it ran and reported failure
    /// - `Timeout` if nothing came back within the configured bound
    /// - `Transport` / `MalformedCall` for channel problems
    pub async fn invoke(&self, function: &str, parameters: Payload) -> Result<Payload> {
        self.invoke_with_timeout(function, parameters, self.timeout).await
    }

    /// [`invoke`](Self::invoke) with a per-call bound.
    pub async fn invoke_with_timeout(
        &self,
        function: &str,
        parameters: Payload,
        timeout: Duration,
    ) -> Result<Payload> {
        let request = CallRequest::new(function, parameters)?;
        let id = request.correlation_id.clone();
        let config = RequestConfig::post_json(self.call_url.clone(), &request)?;

        let (tx, mut rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.contains_key(&id) {
                return Err(BridgeError::MalformedCall(format!(
                    "correlation id {id} already in flight"
                )));
            }
            pending.insert(
                id.clone(),
                PendingCall {
                    function: request.function.clone(),
                    state: CallState::Created,
                    reply: tx,
                },
            );
        }
        debug!(%id, function, state = ?CallState::Created, "call created");

        self.mark_sent(&id);
        self.spawn_exchange(id.clone(), request.function.clone(), config);

        let outcome = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BridgeError::Transport(format!(
                "call {id} was dropped without a response"
            ))),
            Err(_) => {
                // The exchange may have settled in the instant before we
                // got the lock; if so, honour that result instead.
                let removed = lock(&self.pending).remove(&id);
                match removed {
                    Some(_) => {
                        warn!(
                            %id,
                            function,
                            after_ms = timeout.as_millis() as u64,
                            state = ?CallState::TimedOut,
                            "call timed out; it may still complete natively"
                        );
                        return Err(BridgeError::Timeout {
                            function: function.to_owned(),
                            after_ms: timeout.as_millis() as u64,
                        });
                    }
                    None => match rx.try_recv() {
                        Ok(outcome) => outcome,
                        Err(_) => Err(BridgeError::Timeout {
                            function: function.to_owned(),
                            after_ms: timeout.as_millis() as u64,
                        }),
                    },
                }
            }
        };

        match outcome?.into_result() {
            Ok(result) => Ok(result),
            Err(message) => Err(BridgeError::Remote(message)),
        }
    }

    /// Settle a pending call with a response obtained out of band.
    ///
    /// Returns `false` (and discards the response) when no call with that
    /// correlation id is pending.
    pub fn resolve(&self, response: CallResponse) -> bool {
        let id = response.correlation_id.clone();
        let outcome = response.validate().map(|()| response);
        settle(&self.pending, &self.discarded, &id, outcome)
    }

    fn mark_sent(&self, id: &CorrelationId) {
        if let Some(call) = lock(&self.pending).get_mut(id) {
            call.state = CallState::Sent;
            debug!(%id, function = %call.function, state = ?call.state, "call sent");
        }
    }

    fn spawn_exchange(&self, id: CorrelationId, function: String, config: RequestConfig) {
        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        let discarded = Arc::clone(&self.discarded);

        tokio::spawn(async move {
            match transport.send(config).await {
                Ok(response) => route_response(&pending, &discarded, &id, &function, response),
                Err(e) => {
                    settle(&pending, &discarded, &id, Err(e));
                }
            }
        });
    }
}

/// Turn an HTTP response into a settlement.
fn route_response(
    pending: &PendingTable,
    discarded: &AtomicU64,
    id: &CorrelationId,
    function: &str,
    response: Response,
) {
    if response.status == 404 {
        settle(pending, discarded, id, Err(BridgeError::NotFound(function.to_owned())));
        return;
    }

    match CallResponse::decode(response.body.as_bytes()) {
        Ok(call_response) if &call_response.correlation_id == id => {
            settle(pending, discarded, id, Ok(call_response));
        }
        Ok(call_response) => {
            // An exchange only ever settles its own call; the stray body is dropped.
            let answered = call_response.correlation_id;
            discarded.fetch_add(1, Ordering::Relaxed);
            warn!(%id, %answered, "discarding response that carried a different correlation id");
            settle(
                pending,
                discarded,
                id,
                Err(BridgeError::MalformedCall(format!(
                    "response for {id} carried correlation id {answered}"
                ))),
            );
        }
        Err(decode_err) => {
            let err = if response.status == 400 {
                BridgeError::MalformedCall(error_message(&response.body))
            } else if response.is_success() {
                decode_err
            } else {
                BridgeError::Transport(format!(
                    "native shell answered {} {}: {}",
                    response.status,
                    response.status_text,
                    error_message(&response.body)
                ))
            };
            settle(pending, discarded, id, Err(err));
        }
    }
}

/// Pull `error` out of a `{"ok":false,"error":...}` body, else the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
        .unwrap_or_else(|| body.to_owned())
}

/// Remove the pending entry for `id` and deliver `outcome` to its caller.
fn settle(pending: &PendingTable, discarded: &AtomicU64, id: &CorrelationId, outcome: Outcome) -> bool {
    let Some(call) = lock(pending).remove(id) else {
        discarded.fetch_add(1, Ordering::Relaxed);
        info!(%id, "discarding response for a call that is no longer pending");
        return false;
    };

    let state = match &outcome {
        Ok(response) if response.success => CallState::Resolved,
        _ => CallState::Failed,
    };
    debug!(%id, function = %call.function, ?state, "call settled");

    if call.reply.send(outcome).is_err() {
        // Caller gave up between our remove and the send.
        discarded.fetch_add(1, Ordering::Relaxed);
        debug!(%id, "caller no longer waiting");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Queued exchange: the request as the shell saw it plus the means to answer.
    type Queued = (CallRequest, RequestConfig, oneshot::Sender<Result<Response>>);

    /// Stands in for the native shell; the test decides when and how to answer.
    struct ScriptedShell {
        queue: mpsc::UnboundedSender<Queued>,
    }

    impl Transport for ScriptedShell {
        async fn send(&self, config: RequestConfig) -> Result<Response> {
            let request = CallRequest::decode(config.effective_body())?;
            let (tx, rx) = oneshot::channel();
            self.queue
                .send((request, config, tx))
                .map_err(|_| BridgeError::Transport("shell gone".into()))?;
            rx.await
                .map_err(|_| BridgeError::Transport("shell hung up".into()))?
        }
    }

    fn scripted() -> (CallDispatcher<ScriptedShell>, mpsc::UnboundedReceiver<Queued>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let base = LoopbackUrl::parse("native://127.0.0.1:4580").unwrap();
        (CallDispatcher::new(ScriptedShell { queue: tx }, &base), rx)
    }

    fn reply(config: RequestConfig, status: u16, body: String) -> Result<Response> {
        Ok(Response {
            body,
            status,
            status_text: shellbridge_transport::http::reason_phrase(status).into(),
            headers: Vec::new(),
            config,
        })
    }

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn request_goes_to_call_endpoint_as_post() {
        let (dispatcher, mut shell) = scripted();
        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("Dialog.Alert", payload(json!({"title": "Hi"}))).await }
        });

        let (request, config, answer) = shell.recv().await.unwrap();
        assert_eq!(config.effective_method(), "POST");
        assert_eq!(config.url, "native://127.0.0.1:4580/_native/api/call");
        assert_eq!(request.function, "Dialog.Alert");
        assert_eq!(request.parameters["title"], "Hi");

        let body = serde_json::to_string(&CallResponse::success(request.correlation_id, Payload::new())).unwrap();
        answer.send(reply(config, 200, body)).unwrap();
        assert!(call.await.unwrap().unwrap().is_empty());
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn remote_failure_becomes_remote_error() {
        let (dispatcher, mut shell) = scripted();
        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("Camera.GetPhoto", Payload::new()).await }
        });

        let (request, config, answer) = shell.recv().await.unwrap();
        let body = serde_json::to_string(&CallResponse::failure(request.correlation_id, "camera busy")).unwrap();
        answer.send(reply(config, 200, body)).unwrap();

        match call.await.unwrap() {
            Err(BridgeError::Remote(message)) => assert_eq!(message, "camera busy"),
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_function_is_not_found() {
        let (dispatcher, mut shell) = scripted();
        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("Teleport.Now", Payload::new()).await }
        });

        let (_, config, answer) = shell.recv().await.unwrap();
        answer
            .send(reply(config, 404, r#"{"ok":false,"error":"no such function"}"#.into()))
            .unwrap();

        assert!(matches!(call.await.unwrap(), Err(BridgeError::NotFound(f)) if f == "Teleport.Now"));
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced() {
        let (dispatcher, mut shell) = scripted();
        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("System.Info", Payload::new()).await }
        });

        let (_, _, answer) = shell.recv().await.unwrap();
        answer
            .send(Err(BridgeError::Transport("connection reset".into())))
            .unwrap();

        assert!(matches!(call.await.unwrap(), Err(BridgeError::Transport(_))));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn garbage_body_is_malformed_call() {
        let (dispatcher, mut shell) = scripted();
        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("System.Info", Payload::new()).await }
        });

        let (_, config, answer) = shell.recv().await.unwrap();
        answer.send(reply(config, 200, "not json".into())).unwrap();

        assert!(matches!(call.await.unwrap(), Err(BridgeError::MalformedCall(_))));
    }

    #[tokio::test]
    async fn empty_function_name_is_rejected_before_sending() {
        let (dispatcher, mut shell) = scripted();
        let err = dispatcher.invoke("", Payload::new()).await.unwrap_err();
        assert!(matches!(err, BridgeError::MalformedCall(_)));
        assert!(shell.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_calls_resolve_by_correlation_not_order() {
        let (dispatcher, mut shell) = scripted();
        const N: i64 = 5;

        let mut calls = Vec::new();
        for n in 0..N {
            let dispatcher = dispatcher.clone();
            calls.push(tokio::spawn(async move {
                dispatcher.invoke("Echo.Number", payload(json!({"n": n}))).await
            }));
        }

        let mut queued = Vec::new();
        for _ in 0..N {
            queued.push(shell.recv().await.unwrap());
        }
        assert_eq!(dispatcher.in_flight(), N as usize);

        let ids: std::collections::HashSet<_> =
            queued.iter().map(|(r, _, _)| r.correlation_id.clone()).collect();
        assert_eq!(ids.len(), N as usize);

        // Answer in reverse arrival order.
        for (request, config, answer) in queued.into_iter().rev() {
            let n = request.parameters["n"].clone();
            let body = serde_json::to_string(&CallResponse::success(
                request.correlation_id,
                payload(json!({"n": n})),
            ))
            .unwrap();
            answer.send(reply(config, 200, body)).unwrap();
        }

        for (n, call) in calls.into_iter().enumerate() {
            let result = call.await.unwrap().unwrap();
            assert_eq!(result["n"], json!(n as i64));
        }
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn mismatched_correlation_id_fails_the_call() {
        let (dispatcher, mut shell) = scripted();
        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("System.Info", Payload::new()).await }
        });

        let (_, config, answer) = shell.recv().await.unwrap();
        let body = serde_json::to_string(&CallResponse::success("someone-else".into(), Payload::new())).unwrap();
        answer.send(reply(config, 200, body)).unwrap();

        assert!(matches!(call.await.unwrap(), Err(BridgeError::MalformedCall(_))));
        assert_eq!(dispatcher.discarded_responses(), 1);
    }

    #[tokio::test]
    async fn stray_correlation_id_never_settles_another_pending_call() {
        let (dispatcher, mut shell) = scripted();
        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("Fn.A", Payload::new()).await }
        });
        let (req_a, config_a, answer_a) = shell.recv().await.unwrap();
        let second = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("Fn.B", Payload::new()).await }
        });
        let (req_b, config_b, answer_b) = shell.recv().await.unwrap();
        assert_eq!(dispatcher.in_flight(), 2);

        // A's exchange comes back labelled with B's id.
        let stray = CallResponse::success(req_b.correlation_id.clone(), payload(json!({"from": "A"})));
        answer_a
            .send(reply(config_a, 200, serde_json::to_string(&stray).unwrap()))
            .unwrap();

        assert!(matches!(first.await.unwrap(), Err(BridgeError::MalformedCall(_))));
        assert_eq!(dispatcher.in_flight(), 1);
        assert_eq!(dispatcher.discarded_responses(), 1);
        assert!(!second.is_finished());
        assert_ne!(req_a.correlation_id, req_b.correlation_id);

        let own = CallResponse::success(req_b.correlation_id, payload(json!({"from": "B"})));
        answer_b
            .send(reply(config_b, 200, serde_json::to_string(&own).unwrap()))
            .unwrap();
        assert_eq!(second.await.unwrap().unwrap()["from"], "B");
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once_and_late_response_is_discarded() {
        let (dispatcher, mut shell) = scripted();
        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .invoke_with_timeout("Biometric.Authenticate", Payload::new(), Duration::from_secs(5))
                    .await
            }
        });

        let (request, config, answer) = shell.recv().await.unwrap();
        match call.await.unwrap() {
            Err(BridgeError::Timeout { function, after_ms }) => {
                assert_eq!(function, "Biometric.Authenticate");
                assert_eq!(after_ms, 5000);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert_eq!(dispatcher.in_flight(), 0);

        // Late answer through the exchange task.
        let late = CallResponse::success(request.correlation_id.clone(), payload(json!({"id": "late"})));
        answer
            .send(reply(config, 200, serde_json::to_string(&late).unwrap()))
            .unwrap();
        for _ in 0..10 {
            if dispatcher.discarded_responses() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.discarded_responses(), 1);

        // And through the out-of-band path.
        assert!(!dispatcher.resolve(late));
        assert_eq!(dispatcher.discarded_responses(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn biometric_authenticate_succeeds_then_times_out() {
        let (dispatcher, mut shell) = scripted();
        let dispatcher = dispatcher.with_timeout(Duration::from_secs(5));

        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("Biometric.Authenticate", Payload::new()).await }
        });
        let (request, config, answer) = shell.recv().await.unwrap();
        assert_eq!(request.function, "Biometric.Authenticate");
        let body = serde_json::to_string(&CallResponse::success(
            request.correlation_id,
            payload(json!({"id": "abc"})),
        ))
        .unwrap();
        answer.send(reply(config, 200, body)).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), payload(json!({"id": "abc"})));

        let second = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("Biometric.Authenticate", Payload::new()).await }
        });
        // Hold the exchange open and never answer.
        let (_request, _config, _answer) = shell.recv().await.unwrap();
        assert!(matches!(
            second.await.unwrap(),
            Err(BridgeError::Timeout { after_ms: 5000, .. })
        ));
    }

    #[tokio::test]
    async fn resolve_settles_a_pending_call_out_of_band() {
        let (dispatcher, mut shell) = scripted();
        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.invoke("PushNotifications.GetToken", Payload::new()).await }
        });

        let (request, _config, _answer) = shell.recv().await.unwrap();
        let settled = dispatcher.resolve(CallResponse::success(
            request.correlation_id,
            payload(json!({"token": "t-1"})),
        ));
        assert!(settled);
        assert_eq!(call.await.unwrap().unwrap()["token"], "t-1");
    }

    #[test]
    fn error_message_prefers_error_field() {
        assert_eq!(error_message(r#"{"ok":false,"error":"bad"}"#), "bad");
        assert_eq!(error_message("plain"), "plain");
    }
}
