//! Service registration surfaces.
//!
//! During the configure phase every component receives the same mutable
//! [`ServiceRegistry`]. Once configuration is done the registry is frozen into
//! an [`ExecutionContext`], which later phases can only read from.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use super::ComponentError;

type ServiceEntry = (&'static str, Arc<dyn Any + Send + Sync>);

/// Mutable type-keyed service map.
///
/// At most one service is held per concrete type; registering the same type
/// again replaces the earlier instance.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<TypeId, ServiceEntry>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service by value.
    ///
    /// Returns `true` if a service of the same type was replaced.
    pub fn register<T: Send + Sync + 'static>(&mut self, service: T) -> bool {
        self.register_arc(Arc::new(service))
    }

    /// Register an already shared service.
    pub fn register_arc<T: Send + Sync + 'static>(&mut self, service: Arc<T>) -> bool {
        self.services
            .insert(TypeId::of::<T>(), (type_name::<T>(), service))
            .is_some()
    }

    /// Get the service of type `T`, if one is registered.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let (_, service) = self.services.get(&TypeId::of::<T>())?;
        service.clone().downcast::<T>().ok()
    }

    /// Check whether a service of type `T` is registered.
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Type names of every registered service, sorted.
    pub fn service_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.services.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }

    /// Freeze the registry into a read-only context.
    pub fn into_context(self) -> ExecutionContext {
        ExecutionContext {
            services: Arc::new(self),
        }
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.service_names())
            .finish()
    }
}

/// Read-only lookup surface handed to `initialize` and `migrate`.
///
/// Cloning is cheap; all clones share the same frozen registry.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    services: Arc<ServiceRegistry>,
}

impl ExecutionContext {
    /// Get the service of type `T`, if one is registered.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }

    /// Look up a service a component cannot work without.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ComponentError> {
        self.get::<T>()
            .ok_or(ComponentError::MissingService(type_name::<T>()))
    }

    /// Get the underlying frozen registry.
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Clock(u64);

    struct Store;

    #[test]
    fn register_and_get() {
        let mut registry = ServiceRegistry::new();
        assert!(registry.is_empty());

        assert!(!registry.register(Clock(7)));
        assert!(registry.contains::<Clock>());
        assert!(!registry.contains::<Store>());
        assert_eq!(registry.get::<Clock>().as_deref(), Some(&Clock(7)));
        assert!(registry.get::<Store>().is_none());
    }

    #[test]
    fn registering_same_type_replaces() {
        let mut registry = ServiceRegistry::new();
        registry.register(Clock(1));
        assert!(registry.register(Clock(2)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get::<Clock>().unwrap().0, 2);
    }

    #[test]
    fn context_is_read_only_view() {
        let mut registry = ServiceRegistry::new();
        registry.register(Clock(3));
        registry.register(Store);

        let context = registry.into_context();
        assert_eq!(context.require::<Clock>().unwrap().0, 3);
        assert_eq!(context.services().len(), 2);

        let shared = context.clone();
        assert!(Arc::ptr_eq(
            &context.require::<Clock>().unwrap(),
            &shared.require::<Clock>().unwrap()
        ));
    }

    #[test]
    fn require_reports_missing_type() {
        let context = ServiceRegistry::new().into_context();
        match context.require::<Clock>() {
            Err(ComponentError::MissingService(name)) => assert!(name.ends_with("Clock")),
            other => panic!("expected MissingService, got {other:?}"),
        }
    }
}
