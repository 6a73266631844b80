//! One accepted socket: handshake, read loop and outbound sends.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use channels_protocol::{frame, handshake, FrameError, HandshakeError, Opcode, OutgoingEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::message::Message;
use crate::registry::ClientRegistry;
use crate::server::EventDispatcher;

/// Metadata key holding the authenticated flag.
pub const AUTHENTICATED_KEY: &str = "authenticated";

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// A client socket.
///
/// The read half is owned by [`Connection::serve`]; the write half lives
/// here so that `emit` and broadcasts from other tasks can reach the peer.
pub struct Connection {
    id: String,
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    state: Mutex<ConnectionState>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    metadata: Mutex<HashMap<String, Value>>,
    registry: Arc<ClientRegistry>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub fn new<W>(peer: SocketAddr, writer: W, registry: Arc<ClientRegistry>) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            peer,
            connected_at: Utc::now(),
            state: Mutex::new(ConnectionState::Connecting),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            metadata: Mutex::new(HashMap::new()),
            registry,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    // ── Metadata ──────────────────────────────────────────────────────────

    pub fn set_meta(&self, key: impl Into<String>, value: Value) {
        self.metadata.lock().insert(key.into(), value);
    }

    pub fn meta(&self, key: &str) -> Option<Value> {
        self.metadata.lock().get(key).cloned()
    }

    pub fn remove_meta(&self, key: &str) -> Option<Value> {
        self.metadata.lock().remove(key)
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.set_meta(AUTHENTICATED_KEY, Value::Bool(authenticated));
    }

    pub fn is_authenticated(&self) -> bool {
        self.meta(AUTHENTICATED_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    // ── Sending ───────────────────────────────────────────────────────────

    /// Send `{"event", "data"}` to this connection's peer.
    ///
    /// Failures are logged and returned; they never close the connection.
    pub async fn emit(&self, event: &str, data: Value) -> Result<(), TransportError> {
        let text = OutgoingEvent::new(event, &data).to_text()?;
        let result = self.send_text(&text).await;
        if let Err(e) = &result {
            error!("Error sending '{event}' to {}: {e}", self.peer);
        }
        result
    }

    /// Broadcast to every open connection, this one included only if `include_self`.
    pub async fn broadcast(&self, event: &str, data: Value, include_self: bool) -> usize {
        let exclude = (!include_self).then_some(self.id.as_str());
        self.registry.broadcast_to_all(event, &data, exclude).await
    }

    /// Frame and write already-serialized text.
    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.write_raw(&frame::encode(text)).await?;
        debug!("→ Sent to {}: {text}", self.peer);
        Ok(())
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotOpen)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Drive the connection to completion: handshake, register, read loop, close.
    pub async fn serve<R, D>(
        self: Arc<Self>,
        mut reader: R,
        dispatcher: Arc<D>,
        config: &TransportConfig,
        mut shutdown: watch::Receiver<bool>,
    ) where
        R: AsyncRead + Send + Unpin,
        D: EventDispatcher,
    {
        if let Err(e) = self
            .handshake(&mut reader, config.handshake_buffer_size, &mut shutdown)
            .await
        {
            warn!("Handshake with {} failed: {e}", self.peer);
            self.close().await;
            return;
        }

        self.registry.add(self.clone());
        info!("WebSocket client connected: {} ({})", self.peer, self.id);

        self.read_loop(&mut reader, dispatcher.as_ref(), config.read_buffer_size, &mut shutdown)
            .await;

        self.close().await;
        let lifetime = Utc::now() - self.connected_at;
        info!(
            "WebSocket client disconnected: {} after {}s (total: {})",
            self.peer,
            lifetime.num_seconds(),
            self.registry.len()
        );
    }

    async fn handshake<R>(
        &self,
        reader: &mut R,
        buffer_size: usize,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; buffer_size];
        let n = tokio::select! {
            read = reader.read(&mut buf) => read?,
            _ = shutdown.changed() => return Err(TransportError::Shutdown),
        };
        if n == 0 {
            return Err(HandshakeError::Malformed("connection closed before upgrade".into()).into());
        }

        let response = handshake::negotiate(&buf[..n])?;
        self.write_raw(response.as_bytes()).await?;
        self.transition(ConnectionState::Connecting, ConnectionState::Open);

        debug!("WebSocket handshake completed with {}", self.peer);
        Ok(())
    }

    async fn read_loop<R, D>(
        self: &Arc<Self>,
        reader: &mut R,
        dispatcher: &D,
        buffer_size: usize,
        shutdown: &mut watch::Receiver<bool>,
    ) where
        R: AsyncRead + Unpin,
        D: EventDispatcher,
    {
        let mut buf = vec![0u8; buffer_size];

        loop {
            let n = tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!("Peer {} closed the socket", self.peer);
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!("WebSocket read error for {}: {e}", self.peer);
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    debug!("Shutdown signalled, closing {}", self.peer);
                    break;
                }
            };

            if !self.consume_frames(&buf[..n], dispatcher).await {
                break;
            }
        }
    }

    /// Dispatch every complete frame in one read. Returns `false` when the
    /// connection must end.
    ///
    /// A truncated first frame is fatal. A truncated frame after complete
    /// ones is dropped, since nothing is buffered across reads.
    async fn consume_frames<D: EventDispatcher>(self: &Arc<Self>, data: &[u8], dispatcher: &D) -> bool {
        let mut offset = 0;
        while offset < data.len() {
            let (frame, used) = match frame::decode_prefix(&data[offset..]) {
                Ok(decoded) => decoded,
                Err(FrameError::Truncated { .. }) if offset > 0 => {
                    debug!(
                        "Dropping {} trailing bytes of a partial frame from {}",
                        data.len() - offset,
                        self.peer
                    );
                    return true;
                }
                Err(e) => {
                    warn!("Error decoding frame from {}: {e}", self.peer);
                    return false;
                }
            };
            offset += used;

            if frame.opcode == Opcode::Close {
                debug!("Close frame from {}", self.peer);
                return false;
            }
            if !frame.is_final_text() {
                debug!(
                    "Ignoring {:?} frame (fin={}) from {}",
                    frame.opcode, frame.fin, self.peer
                );
                continue;
            }

            let text = match frame.text() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Error decoding frame from {}: {e}", self.peer);
                    return false;
                }
            };
            if text.is_empty() {
                continue;
            }

            debug!("← Received from {}: {text}", self.peer);
            dispatcher.dispatch(Message::new(self, text)).await;
        }
        true
    }

    /// Move to `Closed`, unregister, and shut the socket. Idempotent.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Closed);
        if previous == ConnectionState::Closed {
            return;
        }

        self.registry.remove(&self.id);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Socket shutdown for {} failed: {e}", self.peer);
            }
        }
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn mark_open(&self) {
        self.transition(ConnectionState::Connecting, ConnectionState::Open);
    }
}
