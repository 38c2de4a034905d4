//! Handler registry and its composition-time builder.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::Error;

use super::{ExecutionScope, Handler, Request, RequestType};

type HandlerFactory<R> =
    dyn Fn(&ExecutionScope) -> Result<Arc<dyn Handler<R>>, Error> + Send + Sync;

struct TypedFactory<R: Request>(Box<HandlerFactory<R>>);

struct Registration {
    request_type: RequestType,
    factory: Box<dyn Any + Send + Sync>,
}

/// Errors raised while composing a [`HandlerRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A second handler was registered for a request type.
    #[error("more than one handler registered for {request_type}")]
    DuplicateHandler {
        /// Offending request type name.
        request_type: &'static str,
    },
    /// Request types declared with `expect` have no handler.
    #[error("no handler registered for: {}", request_types.join(", "))]
    MissingHandlers {
        /// Names of the unregistered request types.
        request_types: Vec<&'static str>,
    },
}

/// Immutable map from request type to its single handler factory.
///
/// Built once at startup and shared behind an `Arc` by every
/// [`super::Dispatcher`].
pub struct HandlerRegistry {
    registrations: HashMap<TypeId, Registration>,
}

impl HandlerRegistry {
    /// Start composing a registry.
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Whether a handler is registered for `R`.
    pub fn contains<R: Request>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<R>())
    }

    /// Registered request types, sorted by name.
    pub fn registered_types(&self) -> Vec<RequestType> {
        let mut types: Vec<_> = self
            .registrations
            .values()
            .map(|registration| registration.request_type)
            .collect();
        types.sort_by_key(|request_type| request_type.name());
        types
    }

    /// Number of registered request types.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Build the handler for `R` within `scope`.
    ///
    /// Returns `None` when `R` has no registration.
    pub(super) fn resolve<R: Request>(
        &self,
        scope: &ExecutionScope,
    ) -> Option<Result<Arc<dyn Handler<R>>, Error>> {
        let registration = self.registrations.get(&TypeId::of::<R>())?;
        let factory = registration.factory.downcast_ref::<TypedFactory<R>>()?;
        Some((factory.0)(scope))
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self
            .registered_types()
            .iter()
            .map(RequestType::name)
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("registered", &names)
            .finish()
    }
}

/// Collects handler registrations and validates them in [`Self::build`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    registrations: HashMap<TypeId, Registration>,
    duplicates: Vec<RequestType>,
    expected: Vec<RequestType>,
}

impl HandlerRegistryBuilder {
    /// Register a shared handler instance for `R`.
    #[must_use]
    pub fn register<R, H>(self, handler: H) -> Self
    where
        R: Request,
        H: Handler<R> + 'static,
    {
        let handler: Arc<dyn Handler<R>> = Arc::new(handler);
        self.insert::<R>(Box::new(move |_scope| Ok(Arc::clone(&handler))))
    }

    /// Register a factory building a fresh handler for `R` in every scope.
    ///
    /// Factory errors surface from dispatch as handler failures.
    #[must_use]
    pub fn register_factory<R, H, F>(self, factory: F) -> Self
    where
        R: Request,
        H: Handler<R> + 'static,
        F: Fn(&ExecutionScope) -> Result<H, Error> + Send + Sync + 'static,
    {
        self.insert::<R>(Box::new(move |scope| {
            factory(scope).map(|handler| Arc::new(handler) as Arc<dyn Handler<R>>)
        }))
    }

    /// Declare that the composition dispatches `R`, so [`Self::build`] fails
    /// when no handler was registered for it.
    #[must_use]
    pub fn expect<R: Request>(mut self) -> Self {
        self.expected.push(RequestType::of::<R>());
        self
    }

    /// Validate and freeze the registry.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateHandler`] when a request type was registered
    /// twice; [`RegistryError::MissingHandlers`] when an expected type has no
    /// handler.
    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        if let Some(duplicate) = self.duplicates.first() {
            return Err(RegistryError::DuplicateHandler {
                request_type: duplicate.name(),
            });
        }

        let mut missing: Vec<_> = self
            .expected
            .iter()
            .filter(|request_type| !self.registrations.contains_key(&request_type.id()))
            .map(RequestType::name)
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            missing.dedup();
            return Err(RegistryError::MissingHandlers {
                request_types: missing,
            });
        }

        debug!(handlers = self.registrations.len(), "handler registry built");
        Ok(HandlerRegistry {
            registrations: self.registrations,
        })
    }

    fn insert<R: Request>(mut self, factory: Box<HandlerFactory<R>>) -> Self {
        let request_type = RequestType::of::<R>();
        if self.registrations.contains_key(&request_type.id()) {
            self.duplicates.push(request_type);
            return self;
        }
        self.registrations.insert(
            request_type.id(),
            Registration {
                request_type,
                factory: Box::new(TypedFactory::<R>(factory)),
            },
        );
        self
    }
}
