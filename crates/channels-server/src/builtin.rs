//! Built-in middleware.

use channels_transport::Message;
use serde_json::json;
use tracing::info;

use crate::middleware::Middleware;

/// Event name that [`RequireAuth`] always lets through.
pub const AUTH_EVENT: &str = "auth";

/// Logs every inbound event.
pub struct LogEvents;

impl Middleware for LogEvents {
    async fn before(&self, message: &Message) -> bool {
        info!("← [{}] from {}: {}", message.event(), message.client_ip(), message.data());
        true
    }

    fn name(&self) -> &str {
        "log_events"
    }
}

/// Rejects payloads that are not a JSON object with a string `event`.
pub struct ValidateJson;

impl Middleware for ValidateJson {
    async fn before(&self, message: &Message) -> bool {
        if message.is_well_formed() {
            return true;
        }
        let _ = message.emit("error", json!({ "message": "Invalid JSON" })).await;
        false
    }

    fn name(&self) -> &str {
        "validate_json"
    }
}

/// Requires the connection to be authenticated for every event except `auth`.
pub struct RequireAuth;

impl Middleware for RequireAuth {
    async fn before(&self, message: &Message) -> bool {
        if message.event() == AUTH_EVENT {
            return true;
        }
        let authenticated = message
            .connection()
            .is_some_and(|connection| connection.is_authenticated());
        if !authenticated {
            let _ = message.emit("error", json!({ "message": "Not authenticated" })).await;
        }
        authenticated
    }

    fn name(&self) -> &str {
        "require_auth"
    }
}
