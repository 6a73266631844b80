//! Built-in events: `ping`, `auth` and `broadcast`.

use std::sync::Arc;

use channels_transport::Message;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::HandlerResult;
use crate::router::EventRouter;

/// Event name used by `broadcast` when the payload does not name one.
pub const DEFAULT_BROADCAST_EVENT: &str = "broadcast";

/// Register every built-in event on `router`.
///
/// With `auth_token` set, `auth` only succeeds when `data.token` matches it.
pub fn register_defaults(router: &mut EventRouter, auth_token: Option<String>) {
    router.on("ping", ping);

    let token = Arc::new(auth_token);
    router.on("auth", move |msg| auth(msg, token.clone()));

    router.on("broadcast", broadcast);
}

async fn ping(msg: Message) -> HandlerResult {
    msg.emit("pong", json!({})).await?;
    Ok(())
}

async fn auth(msg: Message, expected: Arc<Option<String>>) -> HandlerResult {
    let accepted = match expected.as_deref() {
        Some(expected) => msg.data().get("token").and_then(Value::as_str) == Some(expected),
        None => true,
    };

    if !accepted {
        warn!("Rejected auth from {}", msg.client_ip());
        msg.emit("error", json!({ "message": "Invalid token" })).await?;
        return Ok(());
    }

    if let Some(connection) = msg.connection() {
        connection.set_authenticated(true);
    }
    info!("Client {} authenticated", msg.connection_id());
    msg.emit("auth/ok", json!({ "clientId": msg.connection_id() })).await?;
    Ok(())
}

async fn broadcast(msg: Message) -> HandlerResult {
    let data = msg.data();
    let event = data
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_BROADCAST_EVENT)
        .to_string();
    let payload = data.get("data").cloned().unwrap_or_else(|| data.clone());
    let include_self = data.get("includeSelf").and_then(Value::as_bool).unwrap_or(false);

    let sent = msg.broadcast(&event, payload, include_self).await;
    info!("Broadcast '{event}' from {} to {sent} client(s)", msg.connection_id());
    Ok(())
}
