use std::sync::{Arc, Mutex};
use std::time::Duration;

use framelink_client::{
    ClientConfig, ConnectionManager, ConnectionState, DiagnosticKind, RecordingSink,
};
use framelink_frame::Frame;
use framelink_transport::WebSocketTransport;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

type Client = ConnectionManager<WebSocketTransport>;

async fn pump_until<F>(client: &mut Client, mut done: F)
where
    F: FnMut(&Client) -> bool,
{
    timeout(Duration::from_secs(5), async {
        while !done(client) {
            client.run_once().await;
        }
    })
    .await
    .expect("client did not reach the expected state in time");
}

fn fast_retry(max_reconnect_attempts: u32) -> ClientConfig {
    ClientConfig {
        max_reconnect_attempts,
        reconnect_delay: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn reconnects_after_server_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        for round in 0..2u32 {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();

            let Some(Ok(WsMessage::Binary(bytes))) = ws.next().await else {
                panic!("expected a binary frame");
            };
            let frame = Frame::parse(&bytes).unwrap();
            let reply = json!({
                "type": "result",
                "round": round,
                "confidence": frame.confidence,
                "payload_size": frame.payload.len(),
            });
            ws.send(WsMessage::Text(reply.to_string().into()))
                .await
                .unwrap();

            if round == 0 {
                ws.close(None).await.unwrap();
            }
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    let sink = Arc::new(RecordingSink::new());
    let mut client =
        ConnectionManager::with_sink(WebSocketTransport::new(), fast_retry(5), Arc::clone(&sink));
    let received = Arc::new(Mutex::new(Vec::<Value>::new()));
    let inbox = Arc::clone(&received);
    client.on_message(move |value| inbox.lock().unwrap().push(value.clone()));
    client.set_confidence(0.57);

    assert!(client.connect(&format!("ws://{addr}/ws/detect")));

    pump_until(&mut client, Client::is_open).await;
    let first_session = client.session_id();
    client.send_frame(b"jpeg-bytes");
    pump_until(&mut client, |_| received.lock().unwrap().len() == 1).await;

    pump_until(&mut client, |c| c.state() == ConnectionState::AwaitingRetry).await;
    pump_until(&mut client, Client::is_open).await;
    assert_ne!(client.session_id(), first_session);
    assert_eq!(client.retry().attempts(), 0);

    client.send_frame(b"jpeg-bytes");
    pump_until(&mut client, |_| received.lock().unwrap().len() == 2).await;

    client.disconnect();
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not finish")
        .unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received[0]["round"], 0);
    assert_eq!(received[0]["confidence"], 57);
    assert_eq!(received[0]["payload_size"], 10);
    assert_eq!(received[1]["round"], 1);
    assert_eq!(sink.count(DiagnosticKind::ReconnectScheduled), 1);
    assert_eq!(sink.count(DiagnosticKind::RetryExhausted), 0);
}

#[tokio::test]
async fn unreachable_endpoint_exhausts_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let sink = Arc::new(RecordingSink::new());
    let mut client =
        ConnectionManager::with_sink(WebSocketTransport::new(), fast_retry(2), Arc::clone(&sink));

    assert!(client.connect(&format!("ws://{addr}/")));
    pump_until(&mut client, |c| c.state() == ConnectionState::Exhausted).await;

    assert_eq!(sink.count(DiagnosticKind::ReconnectScheduled), 2);
    assert_eq!(sink.count(DiagnosticKind::Session), 3);
    assert_eq!(sink.count(DiagnosticKind::RetryExhausted), 1);

    client.send_frame(b"late");
    assert_eq!(sink.count(DiagnosticKind::SendDropped), 1);
}

#[tokio::test]
async fn malformed_endpoint_is_reported_not_thrown() {
    let sink = Arc::new(RecordingSink::new());
    let mut client =
        ConnectionManager::with_sink(WebSocketTransport::new(), fast_retry(0), Arc::clone(&sink));

    assert!(!client.connect("not a url"));
    assert_eq!(client.state(), ConnectionState::Exhausted);
    assert_eq!(
        sink.kinds(),
        [DiagnosticKind::Transport, DiagnosticKind::RetryExhausted]
    );
}

#[tokio::test]
async fn frames_sent_before_disconnect_reach_the_server() {
    const ROUNDS: usize = 20;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut delivered = 0usize;
        for _ in 0..ROUNDS {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    WsMessage::Binary(_) => delivered += 1,
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        }
        delivered
    });

    for _ in 0..ROUNDS {
        let mut client = ConnectionManager::new(WebSocketTransport::new(), fast_retry(0));
        client.connect(&format!("ws://{addr}/"));
        pump_until(&mut client, Client::is_open).await;

        client.send_frame(b"last");
        client.disconnect();
        timeout(Duration::from_secs(5), client.transport().wait_idle())
            .await
            .expect("session did not shut down");
    }

    let delivered = timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not finish")
        .unwrap();
    assert_eq!(delivered, ROUNDS);
}
