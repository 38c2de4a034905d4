//! Typed command and query dispatch.
//!
//! A request is any value implementing [`Request`]; its Rust type is its
//! identity. The [`HandlerRegistry`] maps each request type to exactly one
//! [`Handler`], validated once at composition time. The [`Dispatcher`]
//! resolves the handler inside a fresh [`ExecutionScope`] for every call and
//! disposes that scope once the handler finishes, whether it succeeded or
//! failed.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use backbone::domain::Error;
//! use backbone::domain::dispatch::{
//!     Dispatcher, ExecutionScope, Handler, HandlerRegistry, Request, RequestKind,
//! };
//!
//! struct Ping;
//!
//! impl Request for Ping {
//!     type Response = &'static str;
//!     const KIND: RequestKind = RequestKind::Query;
//! }
//!
//! struct PingHandler;
//!
//! #[async_trait]
//! impl Handler<Ping> for PingHandler {
//!     async fn handle(&self, _request: Ping, _scope: &ExecutionScope) -> Result<&'static str, Error> {
//!         Ok("pong")
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let registry = HandlerRegistry::builder()
//!     .register::<Ping, _>(PingHandler)
//!     .build()
//!     .expect("valid registry");
//! let dispatcher = Dispatcher::new(registry);
//! assert_eq!(dispatcher.dispatch(Ping).await.expect("dispatch"), "pong");
//! # });
//! ```

use std::any::{TypeId, type_name};
use std::fmt;

use async_trait::async_trait;

use crate::domain::Error;

mod dispatcher;
mod registry;
mod scope;

pub use dispatcher::{DispatchError, Dispatcher};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder, RegistryError};
pub use scope::ExecutionScope;

/// Whether a request mutates state or only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// A mutation. Commands are the requests an idempotency guard protects.
    Command,
    /// A read with no side effects.
    Query,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => f.write_str("command"),
            Self::Query => f.write_str("query"),
        }
    }
}

/// A typed request routed by its own type.
pub trait Request: Send + 'static {
    /// Value produced by the request's handler.
    type Response: Send + 'static;

    /// Command or query.
    const KIND: RequestKind;
}

/// Runtime identity of a request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestType {
    id: TypeId,
    name: &'static str,
}

impl RequestType {
    /// Identity of `R`.
    pub fn of<R: 'static>() -> Self {
        Self {
            id: TypeId::of::<R>(),
            name: type_name::<R>(),
        }
    }

    /// Type id used for registry lookups.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified Rust type name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Business logic bound to one request type.
///
/// Errors are returned to the caller unmodified by the [`Dispatcher`].
#[async_trait]
pub trait Handler<R: Request>: Send + Sync {
    /// Execute `request` within `scope`.
    async fn handle(&self, request: R, scope: &ExecutionScope) -> Result<R::Response, Error>;
}
