//! End-to-end integration tests: opening handshake, framing and the
//! built-in events through a running server.

use std::sync::Arc;
use std::time::Duration;

use channels_protocol::frame;
use channels_server::EventRouter;
use channels_server::builtin::{LogEvents, RequireAuth, ValidateJson};
use channels_server::events::register_defaults;
use channels_transport::{ClientRegistry, TransportConfig, TransportServer};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on a random port with the built-in events registered.
async fn start_test_server(auth_token: Option<&str>) -> TransportServer {
    let mut router = EventRouter::new(Arc::new(ClientRegistry::new()));
    router.use_middleware(LogEvents);
    router.use_middleware(ValidateJson);
    if auth_token.is_some() {
        router.use_middleware(RequireAuth);
    }
    register_defaults(&mut router, auth_token.map(str::to_string));

    let config = TransportConfig {
        port: 0, // OS-assigned
        ..TransportConfig::default()
    };
    TransportServer::start(config, Arc::new(router)).await.unwrap()
}

/// Wait until the server has registered `count` clients.
async fn wait_for_clients(server: &TransportServer, count: usize) {
    timeout(Duration::from_secs(5), async {
        while server.registry().len() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timeout waiting for registry size");
}

async fn connect(server: &TransportServer) -> Client {
    let url = format!("ws://127.0.0.1:{}/", server.port());
    let (ws, _) = connect_async(&url).await.expect("Failed to connect");
    ws
}

async fn send_event(ws: &mut Client, event: &str, data: Value) {
    let text = json!({ "event": event, "data": data }).to_string();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn recv_event(ws: &mut Client) -> Value {
    let msg = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended")
        .expect("WebSocket error");
    let text = msg.into_text().unwrap();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn raw_handshake_returns_accept_key() {
    let server = start_test_server(None).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    let request = "GET /chat HTTP/1.1\r\n\
                   Host: 127.0.0.1\r\n\
                   Upgrade: websocket\r\n\
                   Connection: Upgrade\r\n\
                   Sec-WebSocket-Key: x3JJHMbDL1EzLkh9GBhXDw==\r\n\
                   Sec-WebSocket-Version: 13\r\n\r\n";
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("Timeout waiting for upgrade response")
        .unwrap();
    let response = std::str::from_utf8(&buf[..n]).unwrap();

    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response.contains("Sec-WebSocket-Accept: HSmrc0sMlYUkAGmm5OPpG2HaGWk=\r\n"));
    assert!(response.ends_with("\r\n\r\n"));

    // Masked ping, decoded with the client's own codec.
    wait_for_clients(&server, 1).await;
    let ping = frame::encode_masked(r#"{"event":"ping","data":{}}"#, [0x37, 0xfa, 0x21, 0x3d]);
    stream.write_all(&ping).await.unwrap();

    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("Timeout waiting for pong")
        .unwrap();
    let reply = frame::decode(&buf[..n]).unwrap();
    assert!(!reply.is_masked());
    assert_eq!(reply.text().unwrap(), r#"{"event":"pong","data":{}}"#);
}

#[tokio::test]
async fn missing_key_closes_without_response() {
    let server = start_test_server(None).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
        .await
        .unwrap();

    let mut buf = [0u8; 256];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("Timeout waiting for close")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn ping_returns_pong() {
    let server = start_test_server(None).await;
    let mut ws = connect(&server).await;

    send_event(&mut ws, "ping", json!({})).await;

    assert_eq!(recv_event(&mut ws).await, json!({ "event": "pong", "data": {} }));
}

#[tokio::test]
async fn invalid_json_is_rejected() {
    let server = start_test_server(None).await;
    let mut ws = connect(&server).await;

    ws.send(Message::Text("not json".into())).await.unwrap();

    let reply = recv_event(&mut ws).await;
    assert_eq!(reply["event"], "error");
    assert_eq!(reply["data"]["message"], "Invalid JSON");
}

#[tokio::test]
async fn broadcast_reaches_other_clients_only() {
    let server = start_test_server(None).await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    wait_for_clients(&server, 2).await;

    send_event(&mut alice, "broadcast", json!({ "event": "chat", "data": { "text": "hi" } })).await;
    assert_eq!(
        recv_event(&mut bob).await,
        json!({ "event": "chat", "data": { "text": "hi" } })
    );

    // Alice got nothing: her next reply is the pong.
    send_event(&mut alice, "ping", json!({})).await;
    assert_eq!(recv_event(&mut alice).await["event"], "pong");
}

#[tokio::test]
async fn auth_is_required_when_token_configured() {
    let server = start_test_server(Some("s3cret")).await;
    let mut ws = connect(&server).await;

    send_event(&mut ws, "ping", json!({})).await;
    let reply = recv_event(&mut ws).await;
    assert_eq!(reply["event"], "error");
    assert_eq!(reply["data"]["message"], "Not authenticated");

    send_event(&mut ws, "auth", json!({ "token": "wrong" })).await;
    assert_eq!(recv_event(&mut ws).await["event"], "error");

    send_event(&mut ws, "auth", json!({ "token": "s3cret" })).await;
    let reply = recv_event(&mut ws).await;
    assert_eq!(reply["event"], "auth/ok");
    assert!(reply["data"]["clientId"].is_string());

    send_event(&mut ws, "ping", json!({})).await;
    assert_eq!(recv_event(&mut ws).await["event"], "pong");
}

#[tokio::test]
async fn disconnect_unregisters_client() {
    let server = start_test_server(None).await;
    let mut ws = connect(&server).await;
    let _other = connect(&server).await;
    wait_for_clients(&server, 2).await;

    ws.close(None).await.unwrap();
    wait_for_clients(&server, 1).await;
}

#[tokio::test]
async fn stop_closes_open_clients() {
    let mut server = start_test_server(None).await;
    let mut ws = connect(&server).await;
    wait_for_clients(&server, 1).await;

    server.stop().await;

    let next = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("Timeout waiting for close");
    assert!(!matches!(next, Some(Ok(Message::Text(_)))));
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn stop_closes_sockets_still_in_handshake() {
    let mut server = start_test_server(None).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    // Give the accept loop time to hand the socket to its task.
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.stop().await;

    let mut buf = [0u8; 64];
    let n = timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("socket left open after stop")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn pings_sent_back_to_back_each_get_a_pong() {
    let server = start_test_server(None).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    let request = "GET / HTTP/1.1\r\n\
                   Host: 127.0.0.1\r\n\
                   Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(std::str::from_utf8(&buf[..n]).unwrap().contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    wait_for_clients(&server, 1).await;

    let mut pings = frame::encode_masked(r#"{"event":"ping","data":{}}"#, [1, 2, 3, 4]).to_vec();
    pings.extend_from_slice(&frame::encode_masked(r#"{"event":"ping","data":{}}"#, [5, 6, 7, 8]));
    stream.write_all(&pings).await.unwrap();

    let pong = frame::encode(r#"{"event":"pong","data":{}}"#);
    let mut replies = vec![0u8; pong.len() * 2];
    timeout(Duration::from_secs(5), stream.read_exact(&mut replies))
        .await
        .expect("Timeout waiting for pongs")
        .unwrap();
    assert_eq!(&replies[..pong.len()], &pong[..]);
    assert_eq!(&replies[pong.len()..], &pong[..]);
}
