//! Connection manager: one logical connection that heals itself.
//!
//! ```text
//!            connect                Opened
//! ┌──────┐ ─────────> ┌────────────┐ ──────> ┌──────┐
//! │ Idle │            │ Connecting │         │ Open │
//! └──────┘ <──┐       └────────────┘         └──────┘
//!             │         ^      │ Closed          │ Closed
//!  disconnect │   timer │      v                 v
//!             │       ┌───────────────┐ <────────┘
//!             └────── │ AwaitingRetry │
//!                     └───────────────┘
//!                             │ ceiling reached
//!                             v
//!                       ┌───────────┐
//!                       │ Exhausted │ (until the next explicit connect)
//!                       └───────────┘
//! ```
//!
//! All mutation happens on the task that owns the manager. Session events
//! and the reconnect timer are only observed through [`ConnectionManager::run_once`]
//! (or [`ConnectionManager::drain_events`] for events alone), so no locking
//! is involved.

use framelink_frame::{Dispatcher, FrameEncoder};
use framelink_transport::{
    event_channel, EventSender, Message, Session, SessionEnvelope, SessionEvent, SessionId,
    Transport,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::error::ClientError;
use crate::retry::RetryState;

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and nothing scheduled.
    Idle,
    /// A session was opened and has not completed yet.
    Connecting,
    /// The session is open; frames are delivered.
    Open,
    /// The session closed; a reconnect is scheduled.
    AwaitingRetry,
    /// Reconnects gave up. Terminal until the next explicit `connect`.
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
struct PendingReconnect {
    deadline: Instant,
    attempt: u32,
}

struct ActiveSession<S> {
    id: SessionId,
    handle: S,
}

/// Owns the single session to an endpoint and keeps it alive.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    config: ClientConfig,
    state: ConnectionState,
    session: Option<ActiveSession<T::Session>>,
    endpoint: Option<String>,
    retry: RetryState,
    pending_reconnect: Option<PendingReconnect>,
    encoder: FrameEncoder,
    dispatcher: Dispatcher,
    diagnostics: Box<dyn DiagnosticSink>,
    events_tx: mpsc::UnboundedSender<SessionEnvelope>,
    events_rx: mpsc::UnboundedReceiver<SessionEnvelope>,
    last_session_id: SessionId,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager that reports diagnostics to `tracing`.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self::with_sink(transport, config, TracingSink)
    }

    /// Create a manager with an explicit diagnostic sink.
    pub fn with_sink(
        transport: T,
        config: ClientConfig,
        sink: impl DiagnosticSink + 'static,
    ) -> Self {
        let (events_tx, events_rx) = event_channel();
        Self {
            transport,
            state: ConnectionState::Idle,
            session: None,
            endpoint: None,
            retry: RetryState::new(config.max_reconnect_attempts),
            pending_reconnect: None,
            encoder: FrameEncoder::new(config.confidence),
            dispatcher: Dispatcher::new(),
            diagnostics: Box::new(sink),
            events_tx,
            events_rx,
            last_session_id: 0,
            config,
        }
    }

    /// Open a session to `endpoint`.
    ///
    /// Does nothing when a session is already open, or when an open to the
    /// same endpoint is still in flight. Otherwise any scheduled reconnect is
    /// canceled, a pending open to another endpoint is abandoned, and a new
    /// session is opened.
    ///
    /// Returns whether the open was issued, not whether it succeeded: the
    /// outcome arrives later as a session event.
    pub fn connect(&mut self, endpoint: &str) -> bool {
        match self.state {
            ConnectionState::Open => {
                debug!(endpoint, "session already open");
                return true;
            }
            ConnectionState::Connecting if self.endpoint.as_deref() == Some(endpoint) => {
                debug!(endpoint, "open already in flight");
                return true;
            }
            _ => {}
        }

        self.pending_reconnect = None;
        self.close_session();
        self.endpoint = Some(endpoint.to_string());

        self.last_session_id += 1;
        let id = self.last_session_id;
        let events = EventSender::new(id, self.events_tx.clone());

        match self.transport.open(endpoint, events) {
            Ok(handle) => {
                info!(endpoint, session = id, "connecting");
                self.session = Some(ActiveSession { id, handle });
                self.state = ConnectionState::Connecting;
                true
            }
            Err(err) => {
                self.report(Diagnostic::Failure(err.into()));
                self.schedule_reconnect();
                false
            }
        }
    }

    /// Close the session and stop reconnecting. Idempotent.
    pub fn disconnect(&mut self) {
        self.pending_reconnect = None;
        self.retry.freeze();
        if self.close_session() {
            info!(endpoint = self.endpoint.as_deref(), "disconnected");
        }
        self.state = ConnectionState::Idle;
    }

    /// Frame `payload` and send it. Dropped, with a diagnostic, unless a
    /// session is open.
    pub fn send_frame(&mut self, payload: &[u8]) {
        let active = match (self.state, self.session.as_mut()) {
            (ConnectionState::Open, Some(active)) => active,
            (state, _) => {
                self.report(Diagnostic::SendDropped {
                    bytes: payload.len(),
                    state,
                });
                return;
            }
        };

        let frame = self.encoder.encode(payload);
        if let Err(err) = active.handle.send(Message::Binary(frame)) {
            self.report(Diagnostic::Failure(err.into()));
        }
    }

    /// Set the confidence written into subsequent frames.
    pub fn set_confidence(&mut self, confidence: f64) {
        self.encoder.set_confidence(confidence);
    }

    /// Register a listener for decoded inbound messages.
    pub fn on_message<F>(&mut self, listener: F)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.dispatcher.on_message(listener);
    }

    /// Wait for and process one session event or the reconnect timer.
    ///
    /// Cancel safe: dropping the future before it completes loses nothing.
    /// Never completes while idle with no events queued.
    pub async fn run_once(&mut self) {
        let deadline = self.pending_reconnect.map(|pending| pending.deadline);
        tokio::select! {
            biased;
            envelope = self.events_rx.recv() => {
                if let Some(envelope) = envelope {
                    self.handle_envelope(envelope);
                }
            }
            () = wait_until(deadline) => self.fire_reconnect(),
        }
    }

    /// Process every queued session event without waiting. Returns how many
    /// were processed.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(envelope) = self.events_rx.try_recv() {
            self.handle_envelope(envelope);
            handled += 1;
        }
        handled
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Endpoint of the last `connect`, kept for reconnects.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Id of the current session, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|active| active.id)
    }

    pub fn retry(&self) -> RetryState {
        self.retry
    }

    /// When the scheduled reconnect fires, if one is scheduled.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.pending_reconnect.map(|pending| pending.deadline)
    }

    pub fn confidence(&self) -> f64 {
        self.encoder.confidence()
    }

    pub fn listener_count(&self) -> usize {
        self.dispatcher.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn handle_envelope(&mut self, envelope: SessionEnvelope) {
        if self.session_id() != Some(envelope.session) {
            debug!(session = envelope.session, event = ?envelope.event, "ignoring event from stale session");
            return;
        }

        match envelope.event {
            SessionEvent::Opened => self.on_open(),
            SessionEvent::Message(message) => self.on_inbound(&message),
            SessionEvent::Closed { reason } => self.on_close(reason),
            SessionEvent::Error(detail) => {
                self.report(Diagnostic::Failure(ClientError::Session(detail)));
            }
        }
    }

    fn on_open(&mut self) {
        self.retry.reset();
        self.state = ConnectionState::Open;
        info!(endpoint = self.endpoint.as_deref(), session = self.session_id(), "session open");
    }

    fn on_inbound(&mut self, message: &Message) {
        match self.dispatcher.dispatch(message) {
            Ok(outcome) => {
                for index in outcome.panicked {
                    self.report(Diagnostic::Failure(ClientError::ListenerPanicked { index }));
                }
            }
            Err(err) => self.report(Diagnostic::Failure(err.into())),
        }
    }

    fn on_close(&mut self, reason: Option<String>) {
        info!(endpoint = self.endpoint.as_deref(), ?reason, "session closed");
        self.close_session();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let Some(attempt) = self.retry.record_attempt() else {
            warn!(
                endpoint = self.endpoint.as_deref(),
                attempts = self.retry.attempts(),
                "giving up on reconnect"
            );
            self.state = ConnectionState::Exhausted;
            self.report(Diagnostic::Failure(ClientError::RetryExhausted {
                attempts: self.retry.attempts(),
            }));
            return;
        };

        let delay = self.config.reconnect_delay;
        self.pending_reconnect = Some(PendingReconnect {
            deadline: Instant::now() + delay,
            attempt,
        });
        self.state = ConnectionState::AwaitingRetry;
        self.report(Diagnostic::ReconnectScheduled { attempt, delay });
    }

    fn fire_reconnect(&mut self) {
        let Some(pending) = self.pending_reconnect.take() else {
            return;
        };
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        info!(endpoint, attempt = pending.attempt, "reconnecting");
        self.connect(&endpoint);
    }

    fn close_session(&mut self) -> bool {
        match self.session.take() {
            Some(mut active) => {
                active.handle.close();
                true
            }
            None => false,
        }
    }

    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.report(&diagnostic);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use framelink_transport::MemoryTransport;
    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::diagnostics::{DiagnosticKind, RecordingSink};

    const ENDPOINT: &str = "mem://detector";

    fn client() -> (
        ConnectionManager<MemoryTransport>,
        MemoryTransport,
        Arc<RecordingSink>,
    ) {
        let transport = MemoryTransport::new();
        let sink = Arc::new(RecordingSink::new());
        let client = ConnectionManager::with_sink(
            transport.clone(),
            ClientConfig::default(),
            Arc::clone(&sink),
        );
        (client, transport, sink)
    }

    fn open_client() -> (
        ConnectionManager<MemoryTransport>,
        MemoryTransport,
        Arc<RecordingSink>,
    ) {
        let (mut client, transport, sink) = client();
        assert!(client.connect(ENDPOINT));
        transport.last_peer().unwrap().open();
        client.drain_events();
        assert_eq!(client.state(), ConnectionState::Open);
        (client, transport, sink)
    }

    async fn assert_quiet(client: &mut ConnectionManager<MemoryTransport>) {
        assert!(
            timeout(Duration::from_secs(30), client.run_once())
                .await
                .is_err(),
            "expected no event and no reconnect"
        );
    }

    #[test]
    fn repeated_connect_while_open_keeps_one_session() {
        let (mut client, transport, _sink) = open_client();

        for _ in 0..10 {
            assert!(client.connect(ENDPOINT));
        }
        assert!(client.connect("mem://elsewhere"));

        assert_eq!(transport.opened(), 1);
        assert_eq!(client.endpoint(), Some(ENDPOINT));
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[test]
    fn connect_while_connecting_same_endpoint_is_suppressed() {
        let (mut client, transport, _sink) = client();
        assert!(client.connect(ENDPOINT));
        assert!(client.connect(ENDPOINT));

        assert_eq!(transport.opened(), 1);
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[test]
    fn connect_while_connecting_elsewhere_replaces_session() {
        let (mut client, transport, _sink) = client();
        client.connect(ENDPOINT);
        client.connect("mem://other");

        assert_eq!(transport.opened(), 2);
        assert_eq!(transport.live(), 1);
        let first = transport.peer(0).unwrap();
        assert!(first.is_closed());

        first.open();
        client.drain_events();
        assert_eq!(client.state(), ConnectionState::Connecting);

        transport.peer(1).unwrap().open();
        client.drain_events();
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(client.endpoint(), Some("mem://other"));
    }

    #[test]
    fn send_while_disconnected_is_dropped_and_reported() {
        let (mut client, transport, sink) = client();
        client.send_frame(b"frame");

        client.connect(ENDPOINT);
        client.send_frame(b"frame");

        assert!(transport.last_peer().unwrap().sent().is_empty());
        assert_eq!(sink.count(DiagnosticKind::SendDropped), 2);
    }

    #[test]
    fn send_frame_prefixes_header_with_confidence() {
        let (mut client, transport, _sink) = open_client();
        client.send_frame(b"img");
        client.set_confidence(0.57);
        client.send_frame(b"img");

        let sent = transport.last_peer().unwrap().sent();
        assert_eq!(
            sent,
            vec![
                Message::Binary(Bytes::from_static(&[0x01, 25, b'i', b'm', b'g'])),
                Message::Binary(Bytes::from_static(&[0x01, 57, b'i', b'm', b'g'])),
            ]
        );
        assert!((client.confidence() - 0.57).abs() < f64::EPSILON);
    }

    #[test]
    fn inbound_message_reaches_listeners_in_order() {
        let (mut client, transport, _sink) = open_client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["A", "B", "C"] {
            let seen = Arc::clone(&seen);
            client.on_message(move |value| seen.lock().unwrap().push((tag, value.clone())));
        }

        transport
            .last_peer()
            .unwrap()
            .deliver_text(r#"{"type":"result","detections":[{"label":"cat"}]}"#);
        client.drain_events();

        let seen = seen.lock().unwrap();
        let expected = json!({"type": "result", "detections": [{"label": "cat"}]});
        assert_eq!(
            seen.iter().map(|(tag, _)| *tag).collect::<Vec<_>>(),
            ["A", "B", "C"]
        );
        assert!(seen.iter().all(|(_, value)| *value == expected));
        assert_eq!(client.listener_count(), 3);
    }

    #[test]
    fn malformed_inbound_is_dropped_and_reported() {
        let (mut client, transport, sink) = open_client();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        client.on_message(move |_| *counter.lock().unwrap() += 1);

        let peer = transport.last_peer().unwrap();
        peer.deliver_text("{\"type\":");
        peer.deliver_binary(Bytes::from_static(b"\x01\x02"));
        client.drain_events();

        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(sink.count(DiagnosticKind::Decode), 2);
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[test]
    fn panicking_listener_is_reported() {
        let (mut client, transport, sink) = open_client();
        client.on_message(|_| panic!("bad listener"));
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        client.on_message(move |_| *counter.lock().unwrap() += 1);

        transport.last_peer().unwrap().deliver_text("{}");
        client.drain_events();

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(sink.count(DiagnosticKind::ListenerPanicked), 1);
    }

    #[test]
    fn session_error_is_reported_without_closing() {
        let (mut client, transport, sink) = open_client();
        transport.last_peer().unwrap().fail("connection reset");
        client.drain_events();

        assert_eq!(sink.count(DiagnosticKind::Session), 1);
        assert_eq!(client.state(), ConnectionState::Open);
        assert!(client.reconnect_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_reconnects_after_fixed_delay() {
        let (mut client, transport, _sink) = open_client();
        let started = Instant::now();

        transport.last_peer().unwrap().drop_connection(Some("going away"));
        client.run_once().await;
        assert_eq!(client.state(), ConnectionState::AwaitingRetry);
        assert_eq!(client.retry().attempts(), 1);
        assert_eq!(
            client.reconnect_deadline(),
            Some(started + Duration::from_millis(2000))
        );

        client.run_once().await;
        assert_eq!(transport.opened(), 2);
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert_eq!(transport.last_peer().unwrap().endpoint(), ENDPOINT);

        transport.last_peer().unwrap().open();
        client.run_once().await;
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(client.retry().attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_ceiling() {
        let (mut client, transport, sink) = open_client();

        for attempt in 1..=5 {
            transport.last_peer().unwrap().drop_connection(None);
            client.run_once().await;
            assert_eq!(client.retry().attempts(), attempt);
            client.run_once().await;
            assert_eq!(transport.opened(), 1 + attempt as usize);
        }

        transport.last_peer().unwrap().drop_connection(Some("refused"));
        client.run_once().await;
        assert_eq!(client.state(), ConnectionState::Exhausted);
        assert_eq!(sink.count(DiagnosticKind::RetryExhausted), 1);

        assert_quiet(&mut client).await;
        assert_eq!(transport.opened(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_after_exhaustion_starts_over() {
        let (mut client, transport, _sink) = open_client();
        for _ in 0..6 {
            transport.last_peer().unwrap().drop_connection(None);
            client.run_once().await;
            if client.state() == ConnectionState::AwaitingRetry {
                client.run_once().await;
            }
        }
        assert_eq!(client.state(), ConnectionState::Exhausted);

        assert!(client.connect(ENDPOINT));
        transport.last_peer().unwrap().open();
        client.run_once().await;
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(client.retry().attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_scheduled_reconnect() {
        let (mut client, transport, _sink) = open_client();
        transport.last_peer().unwrap().drop_connection(None);
        client.run_once().await;
        assert!(client.reconnect_deadline().is_some());

        client.disconnect();
        assert!(client.reconnect_deadline().is_none());
        assert_eq!(client.state(), ConnectionState::Idle);

        assert_quiet(&mut client).await;
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_close_after_disconnect_does_not_reconnect() {
        let (mut client, transport, sink) = open_client();
        let peer = transport.last_peer().unwrap();

        client.disconnect();
        assert!(peer.is_closed());
        peer.drop_connection(None);
        client.run_once().await;

        assert_eq!(client.state(), ConnectionState::Idle);
        assert_quiet(&mut client).await;
        assert_eq!(transport.opened(), 1);
        assert_eq!(sink.count(DiagnosticKind::RetryExhausted), 0);

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_connect_cancels_scheduled_reconnect() {
        let (mut client, transport, _sink) = open_client();
        transport.last_peer().unwrap().drop_connection(None);
        client.run_once().await;
        assert_eq!(client.state(), ConnectionState::AwaitingRetry);

        assert!(client.connect("mem://backup"));
        assert!(client.reconnect_deadline().is_none());
        assert_eq!(transport.opened(), 2);

        assert_quiet(&mut client).await;
        assert_eq!(transport.opened(), 2);
        assert_eq!(client.endpoint(), Some("mem://backup"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_open_is_reported_and_retried() {
        let (mut client, transport, sink) = client();
        transport.reject_next_open("address unreachable");

        assert!(!client.connect(ENDPOINT));
        assert_eq!(sink.count(DiagnosticKind::Transport), 1);
        assert_eq!(client.state(), ConnectionState::AwaitingRetry);

        client.run_once().await;
        assert_eq!(transport.opened(), 1);
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[test]
    fn connect_after_disconnect_gets_no_retries_until_open() {
        let (mut client, transport, sink) = open_client();
        client.disconnect();

        client.connect(ENDPOINT);
        transport.last_peer().unwrap().drop_connection(None);
        client.drain_events();

        assert_eq!(client.state(), ConnectionState::Exhausted);
        assert_eq!(sink.count(DiagnosticKind::RetryExhausted), 1);
    }
}
