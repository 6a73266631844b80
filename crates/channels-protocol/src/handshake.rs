//! WebSocket opening handshake (RFC 6455 §4.2).

use std::collections::HashMap;

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;

/// Fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header carrying the client's nonce. Matched case-sensitively.
pub const KEY_HEADER: &str = "Sec-WebSocket-Key";

/// Derive `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Parse `Name: value` header lines, skipping the request line.
///
/// Lines without `": "` are ignored. A repeated header keeps the last value.
pub fn parse_headers(request: &str) -> HashMap<String, String> {
    request
        .split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(": "))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Build the `101 Switching Protocols` response for a computed accept key.
pub fn switching_protocols(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Validate the raw upgrade request and return the response to write.
pub fn negotiate(request: &[u8]) -> Result<String, HandshakeError> {
    let request = std::str::from_utf8(request)
        .map_err(|e| HandshakeError::Malformed(format!("request is not UTF-8: {e}")))?;

    let headers = parse_headers(request);
    let key = headers.get(KEY_HEADER).ok_or(HandshakeError::MissingKey)?;

    Ok(switching_protocols(&accept_key(key)))
}
