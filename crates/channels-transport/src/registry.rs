//! Client registry: the set of open connections and broadcast fan-out.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use channels_protocol::OutgoingEvent;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error};

use crate::connection::Connection;
use crate::error::TransportError;

/// Open connections keyed by connection id.
///
/// Membership tracks the OPEN state: a connection adds itself right after
/// its handshake and removes itself when its read loop exits. All access
/// goes through one `RwLock`; sends always happen on a snapshot taken
/// under the lock and released before any socket write.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Returns `false` if it was already present.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        match self.clients.write().entry(connection.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(connection);
                true
            }
        }
    }

    /// Remove a connection. Returns `false` if it was not present.
    pub fn remove(&self, id: &str) -> bool {
        self.clients.write().remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.clients.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.clients.read().keys().cloned().collect()
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.clients.read().values().cloned().collect()
    }

    /// Send `{"event", "data"}` to every open connection except `exclude`.
    ///
    /// A failing recipient is logged and skipped. Returns the number of
    /// connections the event was written to.
    pub async fn broadcast_to_all(&self, event: &str, data: &Value, exclude: Option<&str>) -> usize {
        let text = match OutgoingEvent::new(event, data).to_text() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize broadcast '{event}': {e}");
                return 0;
            }
        };

        let recipients = self.snapshot();
        let mut delivered = 0;
        for connection in recipients {
            if Some(connection.id()) == exclude || !connection.is_open() {
                continue;
            }
            match connection.send_text(&text).await {
                Ok(()) => delivered += 1,
                Err(e) => error!("Error in broadcast to {}: {e}", connection.peer()),
            }
        }

        debug!("Broadcast '{event}' delivered to {delivered} client(s)");
        delivered
    }

    /// Send an event to one connection by id.
    pub async fn emit_to(&self, id: &str, event: &str, data: Value) -> Result<(), TransportError> {
        let connection = self
            .get(id)
            .ok_or_else(|| TransportError::UnknownConnection(id.to_string()))?;
        connection.emit(event, data).await
    }

    /// Close every registered connection (server shutdown).
    pub async fn close_all(&self) {
        for connection in self.snapshot() {
            connection.close().await;
        }
    }
}
