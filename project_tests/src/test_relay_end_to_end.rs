//! End-to-end relay tests: a real listener, mocked backends, and WebSocket
//! clients speaking STOMP over SockJS or raw frames.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lib_common::discovery::{DiscoveryLoop, HttpResolver, Registry, StaticBackendSource};
use lib_common::messaging::{Broadcaster, Command, Frame, FrameParser, SessionManager};
use lib_common::retrieve::BackendClient;
use lib_common::web::{self, AppState, WebSettings};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

struct Relay {
    address: String,
    sessions: Arc<SessionManager>,
    discovery: DiscoveryLoop,
}

async fn start_relay(backends: Vec<String>) -> Relay {
    let registry = Registry::new();
    let sessions = Arc::new(SessionManager::default());
    let client = BackendClient::new(Duration::from_secs(2)).unwrap();

    let discovery = DiscoveryLoop::new(
        Arc::new(StaticBackendSource::new(backends)),
        Arc::new(HttpResolver::new(client.clone())),
        registry.clone(),
        Arc::new(Broadcaster::new(sessions.clone())),
    );

    let state = Arc::new(AppState {
        registry,
        sessions: sessions.clone(),
        client,
        settings: WebSettings::default(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, web::router(state)).await.unwrap();
    });

    Relay {
        address,
        sessions,
        discovery,
    }
}

async fn backend(info: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ws/info/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(info))
        .mount(&server)
        .await;
    server
}

/// Next text message, skipping SockJS heartbeats and control frames.
async fn next_text(ws: &mut Client) -> String {
    loop {
        let message = tokio::time::timeout(READ_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for the relay")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = message {
            if text.as_str() != "h" {
                return text.as_str().to_string();
            }
        }
    }
}

fn parse_frame(text: &str) -> Frame {
    let mut parser = FrameParser::new();
    parser.push(text.as_bytes());
    parser.next_frame().unwrap().expect("incomplete frame")
}

/// Unwraps one SockJS `a[...]` frame into the STOMP frames it carries.
fn sockjs_frames(text: &str) -> Vec<Frame> {
    let payload = text.strip_prefix('a').expect("not a SockJS message frame");
    let messages: Vec<String> = serde_json::from_str(payload).unwrap();
    messages.iter().map(|m| parse_frame(m)).collect()
}

async fn sockjs_send(ws: &mut Client, stomp: &str) {
    let envelope = serde_json::to_string(&vec![stomp]).unwrap();
    ws.send(Message::text(envelope)).await.unwrap();
}

async fn wait_for_subscription(sessions: &SessionManager, session_id: &str, topic: &str) {
    for _ in 0..200 {
        if sessions
            .get(session_id)
            .and_then(|h| h.subscription_for(topic))
            .is_some()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never subscribed to {}", session_id, topic);
}

#[tokio::test]
async fn sockjs_client_is_told_about_added_and_removed_backends() {
    let backend_a = backend(json!({ "id": "a1", "zoom": 5 })).await;
    let relay = start_relay(vec![backend_a.address().to_string()]).await;

    // --- Connect and handshake ---
    let url = format!("ws://{}/socks-backends/000/abc123/websocket", relay.address);
    let (mut ws, _) = connect_async(url).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "o");

    sockjs_send(&mut ws, "CONNECT\naccept-version:1.1\nheart-beat:0,0\n\n\0").await;
    let frames = sockjs_frames(&next_text(&mut ws).await);
    assert_eq!(frames[0].command, Command::Connected);
    assert_eq!(frames[0].header("session"), Some("abc123"));

    // --- Subscribe to both topics with distinct ids ---
    sockjs_send(&mut ws, "SUBSCRIBE\nid:sub-0\ndestination:/topic/add\n\n\0").await;
    sockjs_send(&mut ws, "SUBSCRIBE\nid:sub-1\ndestination:/topic/remove\n\n\0").await;
    wait_for_subscription(&relay.sessions, "abc123", "/topic/remove").await;

    // --- Cycle 1: the backend appears ---
    let report = relay.discovery.run_cycle().await.unwrap();
    assert_eq!(report.resolved, 1);

    let frames = sockjs_frames(&next_text(&mut ws).await);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, Command::Message);
    assert_eq!(frames[0].header("subscription"), Some("sub-0"));
    assert_eq!(frames[0].header("content-type"), Some("application/json"));
    let info: Value = serde_json::from_slice(&frames[0].body).unwrap();
    assert_eq!(info["id"], json!("a1"));
    assert_eq!(info["zoom"], json!(5));
    assert_eq!(info["scope"], json!("all"));

    // The listing endpoint sees the same registry.
    let list: Vec<Value> = reqwest::get(format!("http://{}/ws/backends/list", relay.address))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], json!("a1"));

    // --- Cycle 2: the backend goes away ---
    backend_a.reset().await;
    Mock::given(method("GET"))
        .and(path("/ws/info/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&backend_a)
        .await;

    let report = relay.discovery.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);

    let frames = sockjs_frames(&next_text(&mut ws).await);
    assert_eq!(frames[0].header("subscription"), Some("sub-1"));
    let info: Value = serde_json::from_slice(&frames[0].body).unwrap();
    assert_eq!(info["id"], json!("a1"));
}

#[tokio::test]
async fn raw_websocket_client_gets_generated_session_and_messages() {
    let backend_b = backend(json!({ "id": "b1" })).await;
    let relay = start_relay(vec![backend_b.address().to_string()]).await;

    let url = format!("ws://{}/socks-backends/websocket", relay.address);
    let (mut ws, _) = connect_async(url).await.unwrap();

    ws.send(Message::text("CONNECT\naccept-version:1.1\n\n\0")).await.unwrap();
    let connected = parse_frame(&next_text(&mut ws).await);
    assert_eq!(connected.command, Command::Connected);
    let session_id = connected.header("session").unwrap().to_string();
    assert_eq!(session_id.len(), 36, "expected a UUID, got {}", session_id);

    ws.send(Message::text("SUBSCRIBE\nid:mine\ndestination:/topic/add\n\n\0"))
        .await
        .unwrap();
    wait_for_subscription(&relay.sessions, &session_id, "/topic/add").await;

    relay.discovery.run_cycle().await.unwrap();
    let message = parse_frame(&next_text(&mut ws).await);
    assert_eq!(message.header("subscription"), Some("mine"));
}

#[tokio::test]
async fn protocol_errors_keep_the_session_open() {
    let backend_c = backend(json!({ "id": "c1" })).await;
    let relay = start_relay(vec![backend_c.address().to_string()]).await;

    let url = format!("ws://{}/socks-backends/000/sess-err/websocket", relay.address);
    let (mut ws, _) = connect_async(url).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "o");

    // Before the handshake, and a command the relay does not accept.
    sockjs_send(&mut ws, "SUBSCRIBE\nid:0\ndestination:/topic/add\n\n\0").await;
    sockjs_send(&mut ws, "SEND\ndestination:/topic/add\n\nhello\0").await;
    ws.send(Message::text("not even json")).await.unwrap();

    sockjs_send(&mut ws, "CONNECT\n\n\0").await;
    let frames = sockjs_frames(&next_text(&mut ws).await);
    assert_eq!(frames[0].command, Command::Connected);

    sockjs_send(&mut ws, "SUBSCRIBE\nid:0\ndestination:/topic/add\n\n\0").await;
    wait_for_subscription(&relay.sessions, "sess-err", "/topic/add").await;

    relay.discovery.run_cycle().await.unwrap();
    let frames = sockjs_frames(&next_text(&mut ws).await);
    assert_eq!(frames[0].header("subscription"), Some("0"));
}

#[tokio::test]
async fn closing_the_client_removes_its_session() {
    let relay = start_relay(vec![]).await;

    let url = format!("ws://{}/socks-backends/000/gone/websocket", relay.address);
    let (mut ws, _) = connect_async(url).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "o");
    assert!(relay.sessions.get("gone").is_some());

    ws.close(None).await.unwrap();
    for _ in 0..200 {
        if relay.sessions.get("gone").is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session was not released after the client closed");
}
