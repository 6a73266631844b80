//! Transport configuration.

/// Listener and socket settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Size of the single read that carries the upgrade request
    pub handshake_buffer_size: usize,
    /// Size of each read in the frame loop. A frame larger than this is
    /// seen as truncated and ends the connection.
    pub read_buffer_size: usize,
    /// Maximum concurrent sockets (connecting or open)
    pub max_connections: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 8765,
            hostname: "127.0.0.1".into(),
            handshake_buffer_size: 1024,
            read_buffer_size: 4096,
            max_connections: None,
        }
    }
}
