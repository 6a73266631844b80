//! Channels Transport Layer
//!
//! Serves the native WebSocket channel over plain TCP sockets.
//! The transport layer handles:
//! - The HTTP upgrade handshake on each accepted socket
//! - Connection lifecycle (connecting, open, closed)
//! - The per-connection read loop and outbound framing
//! - The registry of open connections and broadcast fan-out
//!
//! Event routing is decoupled from the transport via the `EventDispatcher` trait.

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod registry;
pub mod server;

pub use config::TransportConfig;
pub use connection::{Connection, ConnectionState};
pub use error::TransportError;
pub use message::Message;
pub use registry::ClientRegistry;
pub use server::{EventDispatcher, TransportServer};

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;
