//! TCP listener: accepts sockets and runs one connection task per client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::error::TransportError;
use crate::message::Message;
use crate::registry::ClientRegistry;

/// Implemented by the event router. The transport calls `dispatch` for
/// every text message, sequentially, on the sending connection's task.
pub trait EventDispatcher: Send + Sync + 'static {
    /// Registry that connections join once their handshake succeeds.
    fn registry(&self) -> &Arc<ClientRegistry>;

    /// Handle one inbound message. Must not fail: errors are handled inside.
    fn dispatch(&self, message: Message) -> impl std::future::Future<Output = ()> + Send;
}

/// The transport server. Owns the accept loop.
pub struct TransportServer {
    /// Shutdown signal, observed by the accept loop and every read loop
    shutdown_tx: watch::Sender<bool>,
    /// Accept loop task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound address
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
}

impl TransportServer {
    /// Bind the listener and start accepting connections.
    pub async fn start<D: EventDispatcher>(
        config: TransportConfig,
        dispatcher: Arc<D>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind((config.hostname.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        let registry = dispatcher.registry().clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!("WebSocket server listening on ws://{}:{}", config.hostname, local_addr.port());

        let handle = tokio::spawn(accept_loop(listener, dispatcher, Arc::new(config), shutdown_rx));

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
            local_addr,
            registry,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Stop accepting, end every read loop, and close remaining sockets.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.registry.close_all().await;
        info!("WebSocket server stopped");
    }
}

async fn accept_loop<D: EventDispatcher>(
    listener: TcpListener,
    dispatcher: Arc<D>,
    config: Arc<TransportConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("Failed to accept connection: {e}");
                        continue;
                    }
                };

                if let Some(max) = config.max_connections {
                    if active.load(Ordering::Relaxed) >= max {
                        warn!("Connection from {peer} rejected: max connections reached ({max})");
                        continue;
                    }
                }

                active.fetch_add(1, Ordering::Relaxed);
                let (reader, writer) = stream.into_split();
                let connection = Connection::new(peer, writer, dispatcher.registry().clone());
                let dispatcher = dispatcher.clone();
                let config = config.clone();
                let shutdown = shutdown.clone();
                let active = active.clone();

                tokio::spawn(async move {
                    connection.serve(reader, dispatcher, &config, shutdown).await;
                    active.fetch_sub(1, Ordering::Relaxed);
                });
            }
            _ = shutdown.changed() => break,
        }
    }
}
