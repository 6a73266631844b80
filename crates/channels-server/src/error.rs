//! Handler error type.

use channels_transport::TransportError;
use thiserror::Error;

/// Error returned by an event handler. Logged by the router; never sent
/// to the client and never closes the connection.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

pub type HandlerResult = Result<(), HandlerError>;
