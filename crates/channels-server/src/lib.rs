//! Channels server: routes channel events to handlers.
//!
//! The router owns the event table, the middleware chain and the client
//! registry, and provides the `EventDispatcher` implementation for the
//! transport layer.

pub mod builtin;
pub mod error;
pub mod events;
pub mod middleware;
pub mod router;

pub use error::{HandlerError, HandlerResult};
pub use middleware::{Middleware, MiddlewareChain};
pub use router::EventRouter;
