//! Registry configuration loader.
//!
//! The registry source is a JSON object mapping each service name to the
//! identifier of an implementation known to a `ServiceCatalog`:
//!
//! ```json
//! { "math": "demo.math", "service1": "demo.clock" }
//! ```
//!
//! Problems are logged and never fatal: an unreadable file yields an empty
//! registry and an unknown implementation leaves that one service unavailable.

use super::{Service, ServiceRegistry};
use crate::error::{Result, RpcError};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Builds a fresh instance of a service implementation.
pub type ServiceFactory = fn() -> Service;

/// Implementation identifier → factory.
#[derive(Debug, Default, Clone)]
pub struct ServiceCatalog {
    factories: HashMap<String, ServiceFactory>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, implementation: impl Into<String>, factory: ServiceFactory) -> Self {
        self.factories.insert(implementation.into(), factory);
        self
    }

    pub fn instantiate(&self, implementation: &str) -> Option<Service> {
        self.factories.get(implementation).map(|factory| factory())
    }
}

/// Read and parse a registry configuration file.
pub fn load_config(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|e| RpcError::Config {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;

    serde_json::from_str(&content).map_err(|e| RpcError::Config {
        message: format!("Failed to parse {}: {}", path.display(), e),
    })
}

impl ServiceRegistry {
    /// Build a registry from `name → implementation` entries.
    pub fn from_entries(entries: &BTreeMap<String, String>, catalog: &ServiceCatalog) -> Self {
        let mut builder = ServiceRegistry::builder();

        for (name, implementation) in entries {
            match catalog.instantiate(implementation) {
                Some(service) => {
                    debug!("Registered service {} ({})", name, implementation);
                    builder = builder.register_as(name.clone(), service);
                }
                None => {
                    warn!(
                        "Service {} is not available: unknown implementation {}",
                        name, implementation
                    );
                }
            }
        }

        builder.build()
    }

    /// Build a registry from a configuration file.
    ///
    /// Never fails; see the module docs for how problems are handled.
    pub fn from_config(path: impl AsRef<Path>, catalog: &ServiceCatalog) -> Self {
        let path = path.as_ref();

        let entries = match load_config(path) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Can't load services from {}: {}", path.display(), e);
                return ServiceRegistry::default();
            }
        };

        let registry = Self::from_entries(&entries, catalog);
        info!(
            "Loaded {} of {} services from {}",
            registry.len(),
            entries.len(),
            path.display()
        );
        registry
    }
}
