//! Routes requests to their registered handler.

use std::sync::Arc;

use serde_json::json;
use tracing::{Instrument, debug, info_span};

use crate::domain::Error;

use super::{ExecutionScope, HandlerRegistry, Request, RequestType};

/// Failures surfaced by [`Dispatcher::dispatch`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// No handler is registered for the request type.
    #[error("no handler registered for {request_type}")]
    HandlerNotFound {
        /// Name of the unregistered request type.
        request_type: &'static str,
    },
    /// The handler (or its factory) failed.
    #[error(transparent)]
    Handler(Error),
}

impl DispatchError {
    /// Convert into the domain error inbound adapters render.
    ///
    /// Handler errors pass through unchanged; a missing handler is a wiring
    /// fault and maps to an internal error.
    pub fn into_domain_error(self) -> Error {
        match self {
            Self::HandlerNotFound { request_type } => {
                Error::internal("no handler registered for request")
                    .with_details(json!({ "requestType": request_type }))
            }
            Self::Handler(error) => error,
        }
    }
}

impl From<DispatchError> for Error {
    fn from(value: DispatchError) -> Self {
        value.into_domain_error()
    }
}

/// Stateless entry point for command and query execution.
///
/// Cloning is cheap; all clones share one registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over a validated registry.
    pub fn new(registry: impl Into<Arc<HandlerRegistry>>) -> Self {
        Self {
            registry: registry.into(),
        }
    }

    /// The registry requests are routed through.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Route `request` to its handler inside a fresh [`ExecutionScope`].
    ///
    /// The scope is disposed before this returns, on success or failure.
    ///
    /// # Errors
    ///
    /// [`DispatchError::HandlerNotFound`] when `R` is unregistered;
    /// [`DispatchError::Handler`] carrying the handler's error otherwise.
    pub async fn dispatch<R: Request>(&self, request: R) -> Result<R::Response, DispatchError> {
        let request_type = RequestType::of::<R>();
        let scope = ExecutionScope::new(request_type);
        let span = info_span!(
            "dispatch",
            request_type = request_type.name(),
            kind = %R::KIND,
            scope_id = %scope.id(),
        );

        let result = self.run(request, &scope).instrument(span).await;
        scope.dispose();

        if let Err(error) = &result {
            debug!(request_type = request_type.name(), error = %error, "dispatch failed");
        }
        result
    }

    async fn run<R: Request>(
        &self,
        request: R,
        scope: &ExecutionScope,
    ) -> Result<R::Response, DispatchError> {
        let handler = self
            .registry
            .resolve::<R>(scope)
            .ok_or(DispatchError::HandlerNotFound {
                request_type: scope.request_type().name(),
            })?
            .map_err(DispatchError::Handler)?;
        handler
            .handle(request, scope)
            .await
            .map_err(DispatchError::Handler)
    }
}
