//! Process-wide registry of router instances.
//!
//! Instances are linked in on creation and stay for the life of the
//! process; the registry exists so operator tooling can walk every router
//! without holding references of its own.

use super::RouterInstance;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

/// Set of every router instance in the process.
#[derive(Debug, Default)]
pub struct Registry {
    instances: Mutex<Vec<Arc<RouterInstance>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a new instance into the registry.
    pub fn register(&self, instance: Arc<RouterInstance>) {
        self.instances.lock().push(instance);
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    /// Returns true if no instances are registered.
    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }

    /// Snapshot of the registered instances.
    pub fn instances(&self) -> Vec<Arc<RouterInstance>> {
        self.instances.lock().clone()
    }
}

/// The process-global registry.
pub fn global() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{AuthBlob, RouterConfig};

    #[test]
    fn test_register_and_walk() {
        let registry = Registry::new();
        assert!(registry.is_empty());

        let config = RouterConfig::default().server_id(101);
        let auth = AuthBlob::new("repl", "secret", "");
        let instance = RouterInstance::for_tests(config, auth);
        registry.register(instance.clone());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.instances()[0].server_id(), 101);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(global(), global()));
    }
}
