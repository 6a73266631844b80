//! Shared helpers for in-memory socket tests.

use std::net::SocketAddr;
use std::sync::Arc;

use channels_protocol::{frame, FrameError};
use tokio::io::{duplex, AsyncReadExt, DuplexStream};

use crate::connection::Connection;
use crate::registry::ClientRegistry;

pub fn test_peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

/// An open connection backed by an in-memory pipe, plus the peer's end.
pub fn open_connection(registry: &Arc<ClientRegistry>) -> (Arc<Connection>, DuplexStream) {
    let (client, server) = duplex(64 * 1024);
    let connection = Connection::new(test_peer(), server, registry.clone());
    connection.mark_open();
    (connection, client)
}

/// Read until one complete frame is available and return its text.
pub async fn read_frame_text(stream: &mut DuplexStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match frame::decode(&buf) {
            Ok(frame) => return frame.text().unwrap().to_string(),
            Err(FrameError::Truncated { .. }) => {}
            Err(e) => panic!("bad frame from server: {e}"),
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "stream closed before a full frame arrived");
        buf.extend_from_slice(&chunk[..n]);
    }
}
