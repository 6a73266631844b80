//! Transport error type.

use channels_protocol::{FrameError, HandshakeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("connection is not open")]
    NotOpen,

    #[error("server is shutting down")]
    Shutdown,

    #[error("unknown connection: {0}")]
    UnknownConnection(String),
}
