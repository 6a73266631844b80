//! Inbound message envelope bound to the connection that sent it.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};

use channels_protocol::Envelope;
use serde_json::Value;

use crate::connection::Connection;
use crate::error::TransportError;

/// One decoded text payload, parsed into event name and data.
///
/// Holds only a weak reference to its connection, so keeping a message
/// around never keeps a socket alive.
#[derive(Debug, Clone)]
pub struct Message {
    envelope: Envelope,
    raw: String,
    peer: SocketAddr,
    connection_id: String,
    connection: Weak<Connection>,
}

impl Message {
    pub fn new(connection: &Arc<Connection>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            envelope: Envelope::parse(&raw),
            raw,
            peer: connection.peer(),
            connection_id: connection.id().to_string(),
            connection: Arc::downgrade(connection),
        }
    }

    pub fn event(&self) -> &str {
        &self.envelope.event
    }

    pub fn data(&self) -> &Value {
        &self.envelope.data
    }

    /// The raw payload exactly as received.
    pub fn text(&self) -> &str {
        &self.raw
    }

    /// Whether the payload was a JSON object with a string `event`.
    pub fn is_well_formed(&self) -> bool {
        self.envelope.well_formed
    }

    pub fn client_ip(&self) -> IpAddr {
        self.peer.ip()
    }

    pub fn client_port(&self) -> u16 {
        self.peer.port()
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The originating connection, if it still exists.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }

    /// Reply to the sender only.
    pub async fn emit(&self, event: &str, data: Value) -> Result<(), TransportError> {
        let connection = self.connection().ok_or(TransportError::NotOpen)?;
        connection.emit(event, data).await
    }

    /// Send to every open connection; the sender is included only if `include_self`.
    pub async fn broadcast(&self, event: &str, data: Value, include_self: bool) -> usize {
        match self.connection() {
            Some(connection) => connection.broadcast(event, data, include_self).await,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientRegistry;
    use crate::test_support::{open_connection, read_frame_text};
    use serde_json::json;

    #[test]
    fn exposes_envelope_and_peer() {
        let registry = Arc::new(ClientRegistry::new());
        let (connection, _client) = open_connection(&registry);

        let msg = Message::new(&connection, r#"{"event":"chat","data":{"text":"hola"}}"#);
        assert_eq!(msg.event(), "chat");
        assert_eq!(msg.data()["text"], "hola");
        assert!(msg.is_well_formed());
        assert_eq!(msg.client_ip().to_string(), "127.0.0.1");
        assert_eq!(msg.client_port(), 40000);
        assert_eq!(msg.connection_id(), connection.id());
    }

    #[test]
    fn plain_text_uses_fallback_envelope() {
        let registry = Arc::new(ClientRegistry::new());
        let (connection, _client) = open_connection(&registry);

        let msg = Message::new(&connection, "just words");
        assert_eq!(msg.event(), "message");
        assert_eq!(msg.data(), &json!({"text": "just words"}));
        assert_eq!(msg.text(), "just words");
        assert!(!msg.is_well_formed());
    }

    #[tokio::test]
    async fn emit_replies_to_the_sender() {
        let registry = Arc::new(ClientRegistry::new());
        let (connection, mut client) = open_connection(&registry);

        let msg = Message::new(&connection, r#"{"event":"ping"}"#);
        msg.emit("pong", json!({})).await.unwrap();

        assert_eq!(read_frame_text(&mut client).await, r#"{"event":"pong","data":{}}"#);
    }

    #[tokio::test]
    async fn message_does_not_keep_connection_alive() {
        let registry = Arc::new(ClientRegistry::new());
        let (connection, _client) = open_connection(&registry);

        let msg = Message::new(&connection, "bye");
        drop(connection);

        assert!(msg.connection().is_none());
        assert!(matches!(msg.emit("x", json!({})).await, Err(TransportError::NotOpen)));
        assert_eq!(msg.broadcast("x", json!({}), true).await, 0);
    }
}
