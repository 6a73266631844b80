//! Middleware chain for inbound events.
//!
//! Middleware inspect a message before it reaches its handler and decide
//! whether dispatch continues. They run in registration order and the
//! first rejection stops the chain.

use std::future::Future;
use std::pin::Pin;

use channels_transport::Message;
use tracing::debug;

/// Trait for event middleware.
pub trait Middleware: Send + Sync {
    /// Return `false` to stop dispatch. A rejecting middleware sends any
    /// reply the client should see itself.
    fn before(&self, message: &Message) -> impl Future<Output = bool> + Send;

    /// Middleware name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of Middleware trait (all refs share lifetime `'a`).
trait MiddlewareDyn: Send + Sync {
    fn before_dyn<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    fn name_dyn(&self) -> &str;
}

impl<T: Middleware> MiddlewareDyn for T {
    fn before_dyn<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(self.before(message))
    }

    fn name_dyn(&self) -> &str {
        self.name()
    }
}

/// Adapts an async closure over an owned [`Message`] into a [`Middleware`].
pub struct FnMiddleware<F> {
    name: String,
    func: F,
}

impl<F> FnMiddleware<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    fn before(&self, message: &Message) -> impl Future<Output = bool> + Send {
        (self.func)(message.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An ordered chain of middleware.
pub struct MiddlewareChain {
    middlewares: Vec<Box<dyn MiddlewareDyn>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }

    /// Run every middleware in order. Returns `false` at the first rejection.
    pub async fn run(&self, message: &Message) -> bool {
        for mw in &self.middlewares {
            if !mw.before_dyn(message).await {
                debug!("Event '{}' blocked by middleware '{}'", message.event(), mw.name_dyn());
                return false;
            }
        }
        true
    }

    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name_dyn()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}
