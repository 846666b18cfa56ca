//! Storage registry for resolving a transfer collaborator by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use carecache_common::{Error, Result};

use crate::http::{HttpBlobConfig, HttpBlobStorage};
use crate::local::LocalBlobStorage;
use crate::memory::MemoryBlobStorage;
use crate::provider::BlobStorage;

/// Factory function type for creating storages.
pub type StorageFactory = Box<dyn Fn(Value) -> Result<Arc<dyn BlobStorage>> + Send + Sync>;

/// Registry for blob storage factories.
///
/// Allows the configured storage backend to be chosen at runtime from a
/// name plus a JSON configuration block.
pub struct StorageRegistry {
    factories: HashMap<String, StorageFactory>,
}

impl StorageRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a storage factory.
    ///
    /// # Preconditions
    /// - `name` must be unique within the registry
    ///
    /// # Postconditions
    /// - Factory is registered and can be resolved by name
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StorageFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Storage '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a storage by name and configuration.
    ///
    /// # Preconditions
    /// - Storage must be registered
    /// - Configuration must be valid for the backend
    ///
    /// # Postconditions
    /// - Returns a ready-to-use storage instance
    ///
    /// # Errors
    /// - Storage not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn BlobStorage>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Storage '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered storage names, sorted.
    pub fn storages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a storage is registered.
    pub fn has_storage(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_local(config: Value) -> Result<Arc<dyn BlobStorage>> {
    let root = config
        .get("root")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidInput("Local storage requires 'root' path".to_string()))?;
    let mut storage = LocalBlobStorage::new(root)?;
    if let Some(base) = config.get("public_base").and_then(|v| v.as_str()) {
        storage = storage.with_public_base(base)?;
    }
    Ok(Arc::new(storage))
}

fn build_http(config: Value) -> Result<Arc<dyn BlobStorage>> {
    let config: HttpBlobConfig = serde_json::from_value(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid HTTP storage config: {}", e)))?;
    Ok(Arc::new(HttpBlobStorage::new(config)?))
}

/// Create a registry with the built-in storages: `memory`, `local`, `http`.
pub fn create_default_registry() -> StorageRegistry {
    let mut registry = StorageRegistry::new();
    let builtins: [(&str, StorageFactory); 3] = [
        (
            "memory",
            Box::new(|_config| Ok(Arc::new(MemoryBlobStorage::new()) as Arc<dyn BlobStorage>)),
        ),
        ("local", Box::new(build_local)),
        ("http", Box::new(build_http)),
    ];

    for (name, factory) in builtins {
        // Names are unique within this table, so registration cannot collide.
        let _ = registry.register(name, factory);
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StorageRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryBlobStorage::new()))))
            .unwrap();

        let storage = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(storage.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = StorageRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryBlobStorage::new()))))
            .unwrap();

        let result =
            registry.register("test", Box::new(|_| Ok(Arc::new(MemoryBlobStorage::new()))));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = StorageRegistry::new();
        let result = registry.resolve("unknown", Value::Null);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(registry.storages(), vec!["http", "local", "memory"]);

        let temp = TempDir::new().unwrap();
        let local = registry
            .resolve("local", json!({"root": temp.path().to_str().unwrap()}))
            .unwrap();
        assert_eq!(local.name(), "local");

        assert!(registry.resolve("local", json!({})).is_err());
        assert!(registry.resolve("http", json!({"endpoint": "https://x"})).is_err());

        let http = registry
            .resolve(
                "http",
                json!({"endpoint": "https://x/storage/v1", "bucket": "profiles"}),
            )
            .unwrap();
        assert_eq!(http.name(), "http");
    }
}
