//! Module registry.
//!
//! # Responsibilities
//! - Map module ids to descriptors
//! - Reject duplicate or malformed registrations
//! - Serve unbounded concurrent lookups once startup is done
//!
//! # Design Decisions
//! - Registries are plain values injected into `lifecycle::Context`
//! - `Registry::global()` is the one explicit process-default instance,
//!   created on first use with the built-in modules already registered

use std::sync::{Arc, LazyLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::module::{ModuleId, ModuleInfo, RegistryError};

static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| {
    let registry = Registry::new();
    if let Err(e) = crate::logging::register_modules(&registry) {
        tracing::error!(error = %e, "Failed to register built-in logging modules");
    }
    Arc::new(registry)
});

/// Table of module id → descriptor. Entries are write-once.
#[derive(Debug, Default)]
pub struct Registry {
    modules: DashMap<String, Arc<ModuleInfo>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-default registry.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL)
    }

    /// Register a module descriptor. Fails if the id is taken or malformed.
    pub fn register(&self, info: ModuleInfo) -> Result<(), RegistryError> {
        let id = info.id().clone();
        if !id.is_well_formed() {
            return Err(RegistryError::InvalidId(id.to_string()));
        }

        match self.modules.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(info));
                tracing::debug!(module = %id, "Module registered");
                Ok(())
            }
        }
    }

    /// Look up a descriptor by full id.
    pub fn lookup(&self, id: &str) -> Option<Arc<ModuleInfo>> {
        self.modules.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    /// Sorted ids of every module inside `namespace`, at any depth.
    pub fn modules_in(&self, namespace: &str) -> Vec<ModuleId> {
        let prefix = format!("{}.", namespace);
        let mut ids: Vec<ModuleId> = self
            .modules
            .iter()
            .filter(|entry| namespace.is_empty() || entry.key().starts_with(&prefix))
            .map(|entry| entry.value().id().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use serde::Deserialize;
    use std::thread;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Probe {
        tag: String,
    }

    impl Module for Probe {}

    #[test]
    fn test_register_then_lookup() {
        let registry = Registry::new();
        registry
            .register(ModuleInfo::builder::<Probe>("test.probe").build())
            .unwrap();

        let info = registry.lookup("test.probe").expect("registered module");
        assert_eq!(info.id().as_str(), "test.probe");
        assert!(registry.lookup("test.missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = Registry::new();
        registry
            .register(ModuleInfo::builder::<Probe>("test.probe").build())
            .unwrap();

        let err = registry
            .register(ModuleInfo::builder::<Probe>("test.probe").build())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(id) if id == "test.probe"));
    }

    #[test]
    fn test_malformed_id_rejected() {
        let registry = Registry::new();
        for id in ["", "a..b", ".a", "a."] {
            let err = registry
                .register(ModuleInfo::builder::<Probe>(id).build())
                .unwrap_err();
            assert!(matches!(err, RegistryError::InvalidId(_)));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_modules_in_namespace() {
        let registry = Registry::new();
        for id in ["http.handlers.b", "http.handlers.a", "http.matchers.host", "tls"] {
            registry.register(ModuleInfo::builder::<Probe>(id).build()).unwrap();
        }

        let handlers: Vec<String> = registry
            .modules_in("http.handlers")
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(handlers, vec!["http.handlers.a", "http.handlers.b"]);
        assert_eq!(registry.modules_in("http").len(), 3);
        assert_eq!(registry.modules_in("").len(), 4);
    }

    #[test]
    fn test_concurrent_lookups() {
        let registry = Arc::new(Registry::new());
        registry
            .register(ModuleInfo::builder::<Probe>("test.probe").build())
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || (0..1000).all(|_| registry.lookup("test.probe").is_some()))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn test_global_has_builtin_writers() {
        let registry = Registry::global();
        assert!(registry.contains("logging.writers.stderr"));
        assert!(registry.contains("logging.writers.discard"));
        assert!(registry.contains("logging.encoders.json"));
    }
}
