//! Protocol error types.

use thiserror::Error;

/// Failure to decode a single WebSocket frame.
///
/// Frames are never buffered across socket reads, so every variant is
/// terminal for the connection that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("truncated frame: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unknown opcode 0x{0:X}")]
    UnknownOpcode(u8),

    #[error("frame payload of {0} bytes does not fit in memory")]
    TooLarge(u64),

    #[error("text frame payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Failure to negotiate the HTTP upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("malformed upgrade request: {0}")]
    Malformed(String),

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
}
