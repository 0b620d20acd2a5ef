use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use pulse_core::config::StreamTiming;
use pulse_core::errors::ClientError;
use pulse_core::events::WireEvent;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::sse::SseDecoder;

/// Raw (un-debounced) connection state as the transport sees it. The UI
/// should watch the stabilized mirror, not this.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawState {
    Connecting,
    Connected,
    Disconnected { reason: String },
}

/// Type-specific callbacks for business events. Default methods are no-ops
/// so consumers implement only what they react to.
pub trait FeedHandler: Send + Sync + 'static {
    fn on_verification(&self, _data: &Value) {}
    fn on_status_change(&self, _data: &Value) {}
    fn on_new_scan(&self, _data: &Value) {}
    fn on_error(&self, _data: &Value) {}
}

/// Handler for consumers that only watch connection state.
pub struct NoopHandler;

impl FeedHandler for NoopHandler {}

#[derive(Clone, Debug)]
pub struct FeedClientConfig {
    /// Full URL of the SSE endpoint, e.g. `http://portal:4610/events`.
    pub endpoint: String,
    /// Bearer credential issued by the auth collaborator. `None` makes
    /// `connect()` short-circuit without a network attempt.
    pub token: Option<String>,
    pub timing: StreamTiming,
}

/// Maintains an always-on logical connection to the live feed endpoint,
/// reconnecting with a fixed delay across arbitrarily many transport
/// failures until `disconnect()` is called.
pub struct FeedClient {
    config: FeedClientConfig,
    http: reqwest::Client,
    sink: EventSink,
    state_tx: watch::Sender<RawState>,
    session: Mutex<Option<Session>>,
}

/// Handles scoped to one `connect()` call. The foreground-hint `Notify`
/// lives here rather than on the client so a permit stored while no retry
/// is pending cannot leak into a later session and skip its first delay.
struct Session {
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

impl FeedClient {
    pub fn new(config: FeedClientConfig, handler: impl FeedHandler) -> Self {
        let (state_tx, _) = watch::channel(RawState::Disconnected {
            reason: "Disconnected".into(),
        });
        Self {
            config,
            http: reqwest::Client::new(),
            sink: EventSink::new(Arc::new(handler)),
            state_tx,
            session: Mutex::new(None),
        }
    }

    /// Start (or restart) the connection loop. A prior channel is closed
    /// first so duplicate connections can never dangle.
    pub fn connect(self: &Arc<Self>) {
        self.shutdown_session();

        // Without a local credential the round trip is guaranteed to fail;
        // don't attempt it.
        if self.config.token.is_none() {
            tracing::warn!("connect() without a credential, not opening a channel");
            self.state_tx.send_replace(RawState::Disconnected {
                reason: ClientError::NotAuthenticated.to_string(),
            });
            return;
        }

        let cancel = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        *self.session.lock() = Some(Session {
            cancel: cancel.clone(),
            wake: Arc::clone(&wake),
        });

        let client = Arc::clone(self);
        tokio::spawn(async move { client.run(cancel, wake).await });
    }

    /// Tear the channel down and suppress auto-reconnect until the next
    /// `connect()`. Cancels any pending retry timer, so a stale retry cannot
    /// resurrect a connection the user explicitly closed.
    pub fn disconnect(&self) {
        self.shutdown_session();
        self.state_tx.send_replace(RawState::Disconnected {
            reason: "Disconnected".into(),
        });
    }

    /// Liveness hint from the host environment (tab foregrounded, app
    /// resumed). If a retry is pending, fire it now instead of waiting out
    /// the delay. With no session open the hint has nothing to wake and is
    /// dropped.
    pub fn notify_foreground(&self) {
        if *self.state_tx.borrow() == RawState::Connected {
            return;
        }
        if let Some(session) = &*self.session.lock() {
            session.wake.notify_one();
        }
    }

    /// Raw tri-state; feed this to a [`StateStabilizer`](crate::stabilizer::StateStabilizer)
    /// before showing it to a user.
    pub fn state(&self) -> watch::Receiver<RawState> {
        self.state_tx.subscribe()
    }

    /// Count of non-heartbeat events received over the life of this client.
    /// The counter never resets across reconnects.
    pub fn event_count(&self) -> u64 {
        self.sink.event_count.load(Ordering::Relaxed)
    }

    pub fn event_count_watch(&self) -> watch::Receiver<u64> {
        self.sink.count_tx.subscribe()
    }

    pub fn last_event(&self) -> Option<WireEvent> {
        self.sink.last_event.lock().clone()
    }

    fn shutdown_session(&self) {
        if let Some(session) = self.session.lock().take() {
            session.cancel.cancel();
        }
    }

    /// Publish a raw state on behalf of a session. `disconnect()` and
    /// `connect()` cancel the old token before they write, so a cancelled
    /// session must never touch the shared watch again: a run task resumed
    /// after its `attempt()` future resolved would otherwise overwrite the
    /// terminal `Disconnected` (or a successor session's `Connected`). No
    /// await separates the check from the send.
    fn publish(&self, cancel: &CancellationToken, state: RawState) {
        if !cancel.is_cancelled() {
            self.state_tx.send_replace(state);
        }
    }

    async fn run(&self, cancel: CancellationToken, wake: Arc<Notify>) {
        loop {
            self.publish(&cancel, RawState::Connecting);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = self.attempt(&cancel) => outcome,
            };

            let err = match outcome {
                Ok(()) => ClientError::StreamClosed,
                Err(err) => err,
            };
            tracing::warn!(kind = err.error_kind(), error = %err, "live feed connection lost");

            if !err.is_retryable() {
                self.publish(&cancel, RawState::Disconnected {
                    reason: err.to_string(),
                });
                return;
            }
            self.publish(&cancel, RawState::Connecting);

            // Exactly one pending retry at a time: this sleep is it. The
            // foreground hint wakes it early; cancellation discards it.
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.timing.reconnect_delay) => {}
                _ = wake.notified() => {}
            }
        }
    }

    /// One connection attempt: open, stream until the channel dies.
    async fn attempt(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let mut request = self
            .http
            .get(&self.config.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        // Bound the connecting phase explicitly: some transports never
        // signal an error for a silently-unavailable endpoint.
        let response = tokio::time::timeout(self.config.timing.connect_timeout, request.send())
            .await
            .map_err(|_| ClientError::ConnectTimeout(self.config.timing.connect_timeout))?
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Http(status.as_u16()));
        }

        self.publish(cancel, RawState::Connected);
        tracing::info!(endpoint = %self.config.endpoint, "live feed connected");

        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream().boxed();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::Transport(e.to_string()))?;
            for payload in decoder.push(&chunk) {
                self.sink.ingest(&payload);
            }
        }
        Ok(())
    }
}

/// Per-message parse/classify/dispatch, shared by every connection attempt.
struct EventSink {
    handler: Arc<dyn FeedHandler>,
    event_count: AtomicU64,
    count_tx: watch::Sender<u64>,
    last_event: Mutex<Option<WireEvent>>,
}

impl EventSink {
    fn new(handler: Arc<dyn FeedHandler>) -> Self {
        Self {
            handler,
            event_count: AtomicU64::new(0),
            count_tx: watch::channel(0).0,
            last_event: Mutex::new(None),
        }
    }

    fn ingest(&self, payload: &str) {
        let wire = match WireEvent::parse(payload) {
            Ok(wire) => wire,
            Err(e) => {
                // Malformed frames are dropped; they never tear the
                // connection down.
                tracing::warn!(error = %e, "dropping malformed event");
                return;
            }
        };

        if !wire.is_heartbeat() {
            let count = self.event_count.fetch_add(1, Ordering::Relaxed) + 1;
            self.count_tx.send_replace(count);
        }

        match wire.event_type.as_str() {
            "connected" | "heartbeat" => {}
            "verification" => self.handler.on_verification(&wire.data),
            "status_change" => self.handler.on_status_change(&wire.data),
            "new_scan" => self.handler.on_new_scan(&wire.data),
            "error" => self.handler.on_error(&wire.data),
            other => tracing::debug!(event_type = other, "ignoring unknown event type"),
        }

        *self.last_event.lock() = Some(wire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        verifications: Mutex<Vec<Value>>,
        status_changes: Mutex<Vec<Value>>,
        errors: Mutex<Vec<Value>>,
    }

    impl FeedHandler for Arc<Recorder> {
        fn on_verification(&self, data: &Value) {
            self.verifications.lock().push(data.clone());
        }
        fn on_status_change(&self, data: &Value) {
            self.status_changes.lock().push(data.clone());
        }
        fn on_error(&self, data: &Value) {
            self.errors.lock().push(data.clone());
        }
    }

    fn sink_with_recorder() -> (EventSink, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (EventSink::new(Arc::new(Arc::clone(&recorder))), recorder)
    }

    #[tokio::test]
    async fn heartbeats_update_last_event_but_not_the_counter() {
        let (sink, _) = sink_with_recorder();

        for _ in 0..3 {
            sink.ingest(r#"{"type":"heartbeat","data":{"timestamp":"2026-08-27T10:00:00Z"}}"#);
        }

        assert_eq!(sink.event_count.load(Ordering::Relaxed), 0);
        assert_eq!(sink.last_event.lock().as_ref().unwrap().event_type, "heartbeat");
    }

    #[tokio::test]
    async fn business_events_dispatch_and_count() {
        let (sink, recorder) = sink_with_recorder();

        sink.ingest(r#"{"type":"connected","data":{"timestamp":"2026-08-27T10:00:00Z"}}"#);
        sink.ingest(
            r#"{"type":"verification","data":{"registrationId":"R1","fullName":"Jane Doe","status":"present","timestamp":"2026-08-27T10:00:00Z"}}"#,
        );
        sink.ingest(r#"{"type":"status_change","data":{"registrationId":"R2","fullName":"A","status":"waitlisted","timestamp":"2026-08-27T10:00:01Z"}}"#);

        assert_eq!(sink.event_count.load(Ordering::Relaxed), 3);
        let verifications = recorder.verifications.lock();
        assert_eq!(verifications.len(), 1);
        assert_eq!(verifications[0]["registrationId"], "R1");
        assert_eq!(verifications[0]["fullName"], "Jane Doe");
        assert_eq!(recorder.status_changes.lock().len(), 1);
    }

    #[tokio::test]
    async fn unknown_types_are_counted_but_not_dispatched() {
        let (sink, recorder) = sink_with_recorder();

        sink.ingest(r#"{"type":"room_reassigned","data":{"room":"B12"}}"#);

        assert_eq!(sink.event_count.load(Ordering::Relaxed), 1);
        assert!(recorder.verifications.lock().is_empty());
        assert_eq!(sink.last_event.lock().as_ref().unwrap().event_type, "room_reassigned");
    }

    #[tokio::test]
    async fn malformed_payloads_are_dropped() {
        let (sink, recorder) = sink_with_recorder();

        sink.ingest("not json at all");

        assert_eq!(sink.event_count.load(Ordering::Relaxed), 0);
        assert!(sink.last_event.lock().is_none());
        assert!(recorder.errors.lock().is_empty());
    }

    fn timing(connect_timeout_ms: u64, reconnect_ms: u64) -> StreamTiming {
        StreamTiming {
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            reconnect_delay: Duration::from_millis(reconnect_ms),
            ..StreamTiming::default()
        }
    }

    fn client(endpoint: String, token: Option<&str>, timing: StreamTiming) -> Arc<FeedClient> {
        Arc::new(FeedClient::new(
            FeedClientConfig {
                endpoint,
                token: token.map(Into::into),
                timing,
            },
            NoopHandler,
        ))
    }

    /// Accepts connections and holds them open without ever responding.
    async fn silent_listener() -> (u16, Arc<AtomicU64>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&attempts);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });
        (port, attempts)
    }

    #[tokio::test]
    async fn connect_without_credential_never_touches_the_network() {
        // Port 1 would refuse instantly; the reason string proves we never
        // got far enough to find out.
        let client = client("http://127.0.0.1:1/events".into(), None, timing(200, 600));
        client.connect();

        assert_eq!(
            *client.state().borrow(),
            RawState::Disconnected {
                reason: "Not authenticated".into()
            }
        );
    }

    #[tokio::test]
    async fn connect_timeout_schedules_exactly_one_retry() {
        let (port, attempts) = silent_listener().await;
        let client = client(
            format!("http://127.0.0.1:{port}/events"),
            Some("tok"),
            timing(200, 600),
        );
        client.connect();

        // Attempt 1 opens immediately and times out at 200ms; the single
        // retry is due at ~800ms.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        client.disconnect();
    }

    #[tokio::test]
    async fn disconnect_cancels_the_pending_retry() {
        let (port, attempts) = silent_listener().await;
        let client = client(
            format!("http://127.0.0.1:{port}/events"),
            Some("tok"),
            timing(200, 600),
        );
        client.connect();

        // Let attempt 1 time out, then disconnect during the retry window.
        tokio::time::sleep(Duration::from_millis(400)).await;
        client.disconnect();

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            *client.state().borrow(),
            RawState::Disconnected {
                reason: "Disconnected".into()
            }
        );
    }

    #[tokio::test]
    async fn foreground_hint_fires_the_pending_retry_early() {
        let (port, attempts) = silent_listener().await;
        let client = client(
            format!("http://127.0.0.1:{port}/events"),
            Some("tok"),
            timing(200, 60_000),
        );
        client.connect();

        // In the retry window with a delay far in the future.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        client.notify_foreground();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        client.disconnect();
    }

    #[tokio::test]
    async fn cancelled_session_cannot_overwrite_the_terminal_state() {
        let (port, _attempts) = silent_listener().await;
        let client = client(
            format!("http://127.0.0.1:{port}/events"),
            Some("tok"),
            timing(200, 600),
        );

        // The disconnect sequence: cancel first, then the terminal write.
        let cancel = CancellationToken::new();
        cancel.cancel();
        client.state_tx.send_replace(RawState::Disconnected {
            reason: "Disconnected".into(),
        });

        // A run task resumed after cancellation must return without ever
        // publishing Connecting again.
        client.run(cancel.clone(), Arc::new(Notify::new())).await;
        client.publish(&cancel, RawState::Connecting);
        assert_eq!(
            *client.state().borrow(),
            RawState::Disconnected {
                reason: "Disconnected".into()
            }
        );
    }

    #[tokio::test]
    async fn stale_foreground_hint_does_not_skip_the_first_retry() {
        let (port, attempts) = silent_listener().await;
        let client = client(
            format!("http://127.0.0.1:{port}/events"),
            Some("tok"),
            timing(200, 600),
        );

        // Hint delivered with no session open; it must not bank a permit.
        client.notify_foreground();
        client.connect();

        // Attempt 1 times out at 200ms and the retry is due at ~800ms. A
        // banked permit would have fired it right after the timeout.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        client.disconnect();
    }

    #[tokio::test]
    async fn reconnecting_client_replaces_the_previous_session() {
        let (port, attempts) = silent_listener().await;
        let client = client(
            format!("http://127.0.0.1:{port}/events"),
            Some("tok"),
            timing(60_000, 60_000),
        );
        client.connect();
        tokio::time::sleep(Duration::from_millis(200)).await;
        client.connect(); // closes the first channel before opening another

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        client.disconnect();
    }
}
