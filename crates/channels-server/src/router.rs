//! Event router: dispatches channel messages to event handlers.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use channels_transport::{ClientRegistry, EventDispatcher, Message, TransportError};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::HandlerResult;
use crate::middleware::{FnMiddleware, Middleware, MiddlewareChain};

type BoxedHandler = Box<dyn Fn(Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Event table, middleware chain and client registry.
///
/// Configured with `&mut self` during startup, then shared behind an
/// `Arc` and only read from connection tasks.
pub struct EventRouter {
    events: HashMap<String, BoxedHandler>,
    middleware: MiddlewareChain,
    clients: Arc<ClientRegistry>,
}

impl EventRouter {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self {
            events: HashMap::new(),
            middleware: MiddlewareChain::new(),
            clients,
        }
    }

    /// Register the handler for `event`. A later registration replaces it.
    pub fn on<F, Fut>(&mut self, event: impl Into<String>, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let event = event.into();
        let boxed: BoxedHandler = Box::new(move |message| handler(message).boxed());
        if self.events.insert(event.clone(), boxed).is_some() {
            debug!("Replaced handler for event '{event}'");
        }
        info!("Registered WebSocket event: '{event}'");
    }

    /// Append a middleware to the chain.
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        info!("Registered WebSocket middleware: '{}'", middleware.name());
        self.middleware.add(middleware);
    }

    /// Append an async closure as middleware.
    pub fn use_fn<F, Fut>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.use_middleware(FnMiddleware::new(name, func));
    }

    pub fn has_handler(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    /// Registered event names, sorted.
    pub fn events(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.events.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.middleware.names()
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Run the middleware chain, then the handler for the message's event.
    ///
    /// Unknown events are logged and dropped. Handler errors and panics are
    /// logged; the connection stays open either way.
    pub async fn handle_event(&self, message: Message) {
        if !self.middleware.run(&message).await {
            return;
        }

        let event = message.event().to_string();
        let Some(handler) = self.events.get(&event) else {
            warn!("Event without handler: '{event}'");
            return;
        };

        match AssertUnwindSafe(async { handler(message).await }).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Error in handler '{event}': {e}"),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!("Handler '{event}' panicked: {reason}");
            }
        }
    }

    /// Send an event to one connection (for collaborators outside the channel).
    pub async fn emit_to(&self, connection_id: &str, event: &str, data: Value) -> Result<(), TransportError> {
        self.clients.emit_to(connection_id, event, data).await
    }

    /// Broadcast to every open connection except `exclude`.
    pub async fn broadcast_to_all(&self, event: &str, data: Value, exclude: Option<&str>) -> usize {
        self.clients.broadcast_to_all(event, &data, exclude).await
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(Arc::new(ClientRegistry::new()))
    }
}

impl EventDispatcher for EventRouter {
    fn registry(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    async fn dispatch(&self, message: Message) {
        self.handle_event(message).await;
    }
}
