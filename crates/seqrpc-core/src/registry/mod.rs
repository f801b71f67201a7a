//! Service registry.
//!
//! Maps service names to `Service` method tables. The registry is built once at
//! startup and read concurrently afterwards; it is never mutated while the
//! server runs, so lookups need no locking.

mod loader;
mod service;

pub use loader::{load_config, ServiceCatalog, ServiceFactory};
pub use service::{Handler, Invoke, MethodKey, Service};

use crate::protocol::{Fault, Request};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable name → service mapping.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<Service>>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.services.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Names of all registered services, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Find the method a request targets.
    ///
    /// Fails with an `UnknownService` or `UnknownMethod` fault; these are
    /// reported to the caller rather than treated as server errors.
    pub fn resolve(&self, request: &Request) -> Result<Arc<dyn Invoke>, Fault> {
        let service = self
            .services
            .get(&request.service)
            .ok_or_else(|| Fault::unknown_service(&request.service))?;

        let signature = request.signature();
        service
            .resolve(&request.method, &signature)
            .ok_or_else(|| Fault::unknown_method(&request.service, &request.method, &signature))
    }
}

/// Collects services before the registry is frozen.
#[derive(Debug, Default)]
pub struct ServiceRegistryBuilder {
    services: HashMap<String, Arc<Service>>,
}

impl ServiceRegistryBuilder {
    /// Add a service under its own name, replacing any earlier one.
    pub fn register(self, service: Service) -> Self {
        let name = service.name().to_string();
        self.register_as(name, service)
    }

    /// Add a service under an explicit name.
    pub fn register_as(mut self, name: impl Into<String>, service: Service) -> Self {
        self.services.insert(name.into(), Arc::new(service));
        self
    }

    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry {
            services: self.services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FaultKind;
    use crate::value::Value;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::builder()
            .register(Service::new("math").method("add", |a: i64, b: i64| a + b))
            .build()
    }

    #[test]
    fn test_resolve_known_method() {
        let request = Request::new(1, "math", "add", vec![Value::Int(2), Value::Int(3)]);
        let invoker = registry().resolve(&request).unwrap();
        assert_eq!(invoker.invoke(&request.params), Ok(Some(Value::Int(5))));
    }

    #[test]
    fn test_resolve_unknown_service() {
        let request = Request::new(1, "ghost", "m", vec![]);
        let fault = registry().resolve(&request).err().unwrap();
        assert_eq!(fault.kind, FaultKind::UnknownService);
        assert!(fault.message.contains("ghost"));
    }

    #[test]
    fn test_resolve_unknown_method_and_wrong_kinds() {
        let request = Request::new(1, "math", "pow", vec![Value::Int(2)]);
        let fault = registry().resolve(&request).err().unwrap();
        assert_eq!(fault.kind, FaultKind::UnknownMethod);
        assert!(fault.message.contains("pow"));

        let request = Request::new(2, "math", "add", vec![Value::Str("2".into()), Value::Int(3)]);
        let fault = registry().resolve(&request).err().unwrap();
        assert_eq!(fault.kind, FaultKind::UnknownMethod);
        assert!(fault.message.contains("add(str, int)"));
    }

    #[test]
    fn test_register_as_alias() {
        let registry = ServiceRegistry::builder()
            .register_as("service1", Service::new("clock").method("now", || "noon"))
            .build();
        assert_eq!(registry.names(), vec!["service1".to_string()]);
        assert!(registry.get("clock").is_none());
    }
}
