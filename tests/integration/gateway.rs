//! WebSocket round trips against a live gateway.

use crate::helpers::{EchoClient, FALLBACK, QueueClient};
use colloquy::SessionId;
use colloquy::config::ColloquyConfig;
use colloquy::gateway::{GatewayState, serve};
use colloquy::llm::{CompletionClient, CompletionError};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestGateway {
    addr: SocketAddr,
    state: GatewayState,
    cancel: CancellationToken,
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start_gateway(client: Arc<dyn CompletionClient>) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let state = GatewayState::new(&ColloquyConfig::default(), client, cancel.clone());
    tokio::spawn(serve(listener, state.clone()));
    TestGateway {
        addr,
        state,
        cancel,
    }
}

async fn connect(addr: SocketAddr) -> (Socket, String) {
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let hello = next_json(&mut socket).await;
    assert_eq!(hello["type"], "connected");
    let id = hello["session_id"].as_str().unwrap().to_owned();
    (socket, id)
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket
        .send(Message::Text(value.to_string()))
        .await
        .unwrap();
}

async fn next_json(socket: &mut Socket) -> Value {
    let deadline = Duration::from_secs(2);
    loop {
        let frame = tokio::time::timeout(deadline, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn text_clear_and_malformed_frames() {
    let gateway = start_gateway(Arc::new(EchoClient)).await;
    let (mut socket, id) = connect(gateway.addr).await;
    assert_eq!(id.len(), 32);

    send_json(&mut socket, json!({"type": "text", "text": "hello"})).await;
    assert_eq!(
        next_json(&mut socket).await,
        json!({"type": "response", "text": "hello (1)"})
    );

    // Garbage is ignored and the session keeps working.
    socket
        .send(Message::Text("{not json".to_owned()))
        .await
        .unwrap();
    send_json(&mut socket, json!({"type": "bogus"})).await;

    send_json(&mut socket, json!({"type": "text", "text": "again"})).await;
    assert_eq!(
        next_json(&mut socket).await,
        json!({"type": "response", "text": "again (3)"})
    );

    send_json(&mut socket, json!({"type": "clear"})).await;
    assert_eq!(
        next_json(&mut socket).await,
        json!({"type": "history_cleared"})
    );

    send_json(&mut socket, json!({"type": "text", "text": "fresh"})).await;
    assert_eq!(
        next_json(&mut socket).await,
        json!({"type": "response", "text": "fresh (1)"})
    );
}

#[tokio::test]
async fn clear_sent_right_after_text_is_handled_in_order() {
    let gateway = start_gateway(Arc::new(EchoClient)).await;
    let (mut socket, _) = connect(gateway.addr).await;

    send_json(&mut socket, json!({"type": "text", "text": "hello"})).await;
    send_json(&mut socket, json!({"type": "clear"})).await;
    send_json(&mut socket, json!({"type": "text", "text": "fresh"})).await;

    // The first reply may be cut off by the clear, but it can never follow
    // it, and the next exchange starts from an empty history.
    let mut frames = Vec::new();
    loop {
        let frame = next_json(&mut socket).await;
        let done = frame["type"] == "response" && frame["text"] != "hello (1)";
        frames.push(frame);
        if done {
            break;
        }
    }

    let cleared = json!({"type": "history_cleared"});
    let fresh = json!({"type": "response", "text": "fresh (1)"});
    match frames.as_slice() {
        [c, f] => assert!(c == &cleared && f == &fresh, "{frames:?}"),
        [h, c, f] => assert!(
            h == &json!({"type": "response", "text": "hello (1)"}) && c == &cleared && f == &fresh,
            "{frames:?}"
        ),
        _ => panic!("unexpected frames: {frames:?}"),
    }
}

#[tokio::test]
async fn backend_failure_sends_fallback() {
    let client = Arc::new(QueueClient::new(vec![Err(
        CompletionError::BackendUnreachable("refused".to_owned()),
    )]));
    let gateway = start_gateway(client).await;
    let (mut socket, _) = connect(gateway.addr).await;

    send_json(&mut socket, json!({"type": "text", "text": "hi"})).await;
    assert_eq!(
        next_json(&mut socket).await,
        json!({"type": "response", "text": FALLBACK})
    );
}

#[tokio::test]
async fn sessions_are_per_connection_and_destroyed_on_close() {
    let gateway = start_gateway(Arc::new(EchoClient)).await;
    let registry = gateway.state.registry().clone();

    let (mut first, first_id) = connect(gateway.addr).await;
    let (mut second, second_id) = connect(gateway.addr).await;
    assert_ne!(first_id, second_id);

    send_json(&mut first, json!({"type": "text", "text": "one"})).await;
    next_json(&mut first).await;
    send_json(&mut first, json!({"type": "text", "text": "two"})).await;
    assert_eq!(next_json(&mut first).await["text"], "two (3)");

    // The second connection starts from an empty history.
    send_json(&mut second, json!({"type": "text", "text": "solo"})).await;
    assert_eq!(next_json(&mut second).await["text"], "solo (1)");

    let health: Value = reqwest::get(format!("http://{}/health", gateway.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "ok", "sessions": 2}));

    first.close(None).await.unwrap();
    let first_id = SessionId::from(first_id);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while registry.get(&first_id).await.is_some() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "first session was not destroyed"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(registry.len().await, 1);
    assert_eq!(registry.ids().await, [SessionId::from(second_id)]);
}
