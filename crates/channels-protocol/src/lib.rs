//! Channels wire protocol
//!
//! Pure, I/O-free pieces of the native WebSocket channel:
//! - RFC 6455 frame decoding and encoding
//! - The opening handshake (header parsing and accept-key derivation)
//! - The `{"event": ..., "data": ...}` application envelope
//!
//! Everything here operates on byte slices and strings so the transport
//! layer can drive it from any socket type.

pub mod envelope;
pub mod error;
pub mod frame;
pub mod handshake;

pub use envelope::{Envelope, OutgoingEvent, DEFAULT_EVENT};
pub use error::{FrameError, HandshakeError};
pub use frame::{Frame, Opcode};
pub use handshake::{accept_key, negotiate, WEBSOCKET_GUID};
