use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{EventSender, Message, Session, SessionEvent, Transport};

/// WebSocket transport.
///
/// Every session runs on its own tokio task, so `open` must be called from
/// within a tokio runtime. Outbound binary messages go out as binary
/// WebSocket messages; inbound text and binary messages are forwarded as-is.
///
/// Closing a session flushes the frames it already accepted before the close
/// frame goes out. Clones share the set of session tasks.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    sessions: TaskTracker,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of session tasks still running.
    pub fn running(&self) -> usize {
        self.sessions.len()
    }

    /// Wait until every session task opened so far has exited.
    ///
    /// Sessions must be closed (or dropped) first, otherwise this waits for
    /// the remote side to close them.
    pub async fn wait_idle(&self) {
        self.sessions.close();
        self.sessions.wait().await;
        self.sessions.reopen();
    }
}

impl Transport for WebSocketTransport {
    type Session = WebSocketSession;

    fn open(&mut self, endpoint: &str, events: EventSender) -> Result<WebSocketSession> {
        let request =
            endpoint
                .into_client_request()
                .map_err(|err| TransportError::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                    reason: err.to_string(),
                })?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        debug!(endpoint, session = events.session(), "opening websocket session");
        let task = self.sessions.spawn_on(
            run_session(
                endpoint.to_string(),
                request,
                outbound_rx,
                events,
                cancel.clone(),
            ),
            &runtime,
        );

        Ok(WebSocketSession {
            outbound: outbound_tx,
            cancel,
            task,
        })
    }
}

/// Local handle of a WebSocket session.
#[derive(Debug)]
pub struct WebSocketSession {
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WebSocketSession {
    /// Returns true once the session task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Session for WebSocketSession {
    fn send(&mut self, message: Message) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_session(
    endpoint: String,
    request: Request,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: EventSender,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        () = cancel.cancelled() => {
            debug!(endpoint, "websocket open canceled");
            events.emit(SessionEvent::Closed { reason: Some("closed locally".to_string()) });
            return;
        }
        result = tokio_tungstenite::connect_async(request) => result,
    };

    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!(endpoint, error = %err, "websocket connect failed");
            events.emit(SessionEvent::Error(err.to_string()));
            events.emit(SessionEvent::Closed {
                reason: Some(err.to_string()),
            });
            return;
        }
    };

    info!(endpoint, "websocket connected");
    events.emit(SessionEvent::Opened);
    let (mut sink, mut source) = stream.split();

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // Frames accepted before the close still go out, in order.
                while let Ok(message) = outbound.try_recv() {
                    if sink.feed(into_ws(message)).await.is_err() {
                        break;
                    }
                }
                let _ = sink.send(WsMessage::Close(None)).await;
                let _ = sink.close().await;
                break Some("closed locally".to_string());
            }
            outgoing = outbound.recv() => {
                let Some(message) = outgoing else {
                    let _ = sink.close().await;
                    break Some("session handle dropped".to_string());
                };
                if let Err(err) = sink.send(into_ws(message)).await {
                    events.emit(SessionEvent::Error(err.to_string()));
                    break Some(err.to_string());
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    events.emit(SessionEvent::Message(Message::Text(text.as_str().to_owned())));
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    events.emit(SessionEvent::Message(Message::Binary(bytes)));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame.map(|frame| frame.reason.as_str().to_owned());
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    events.emit(SessionEvent::Error(err.to_string()));
                    break Some(err.to_string());
                }
                None => break None,
            }
        }
    };

    debug!(endpoint, ?reason, "websocket session ended");
    events.emit(SessionEvent::Closed { reason });
}

fn into_ws(message: Message) -> WsMessage {
    match message {
        Message::Binary(bytes) => WsMessage::Binary(bytes),
        Message::Text(text) => WsMessage::Text(text.into()),
    }
}
