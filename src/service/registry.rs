//! Service registry for the broker

use std::collections::HashMap;
use std::sync::Arc;

use super::Service;

/// Services a broker can open, by name
///
/// # Example
///
/// ```rust,ignore
/// let registry = ServiceRegistry::new()
///     .register(UserDbService::new(users));
/// ```
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Service>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Register a service under its own name, replacing any earlier one
    pub fn register<S: Service + 'static>(mut self, service: S) -> Self {
        let name = service.name().to_string();
        if self.services.insert(name.clone(), Arc::new(service)).is_some() {
            tracing::warn!(service = %name, "service registered twice, keeping the last");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).cloned()
    }

    /// Registered service names, in no particular order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.services.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServiceResult, UserDbService};
    use crate::vlist::ValueList;

    struct Named(&'static str);

    impl Service for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn command(
            &self,
            _cmd: &str,
            _limits: Option<&ValueList>,
            _request: &ValueList,
            _response: &mut ValueList,
        ) -> ServiceResult {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ServiceRegistry::new()
            .register(UserDbService::new(Vec::new()))
            .register(Named("system.grp"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("system.pwd").unwrap().name(), "system.pwd");
        assert!(registry.get("system.dns").is_none());

        let mut names: Vec<_> = registry.names().collect();
        names.sort_unstable();
        assert_eq!(names, ["system.grp", "system.pwd"]);
    }

    #[test]
    fn test_empty_registry() {
        let registry = ServiceRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.get("system.pwd").is_none());
    }
}
