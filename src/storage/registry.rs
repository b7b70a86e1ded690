//! Backend factories and the registry that holds them.
//!
//! The registry is an explicit object, built at startup and passed by
//! reference to whatever needs to open storage. Construction is folded
//! into [`StorageFactory::create_storage`]: a factory hands back a storage
//! that is already open, or an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::memory::MemoryStorageFactory;
use super::sqlite::SqliteStorageFactory;
use super::vault::VaultStorageFactory;
use super::{Storage, StorageError, StorageParams};

/// Constructs storages of one backend flavor.
pub trait StorageFactory: Send + Sync {
    /// Stable identifier used in configuration and on the command line,
    /// e.g. `"vault"`.
    fn key(&self) -> &'static str;

    /// Human-readable backend name for listings and error messages.
    fn name(&self) -> &'static str;

    /// Opens (creating if necessary) a storage rooted at
    /// `params.archive_path`.
    ///
    /// # Errors
    ///
    /// [`StorageError::OpenFailed`] when the backing files cannot be
    /// created or opened, [`StorageError::CorruptIndex`] when existing
    /// state is unreadable.
    fn create_storage(&self, params: &StorageParams) -> Result<Arc<dyn Storage>, StorageError>;
}

/// Registry of storage factories, keyed by their stable identifiers.
#[derive(Default)]
pub struct StorageRegistry {
    factories: BTreeMap<&'static str, Arc<dyn StorageFactory>>,
}

impl StorageRegistry {
    /// An empty registry.
    pub fn new() -> StorageRegistry {
        StorageRegistry::default()
    }

    /// A registry with the built-in backends (`vault`, `memory`,
    /// `sqlite`) registered.
    pub fn with_builtin() -> StorageRegistry {
        let mut registry = StorageRegistry::new();
        registry.register(Arc::new(VaultStorageFactory));
        registry.register(Arc::new(MemoryStorageFactory));
        registry.register(Arc::new(SqliteStorageFactory));
        registry
    }

    /// Registers a factory under its key. Returns false (and keeps the
    /// existing factory) when the key is already taken.
    pub fn register(&mut self, factory: Arc<dyn StorageFactory>) -> bool {
        let key = factory.key();
        if self.factories.contains_key(key) {
            tracing::warn!(key = %key, "storage factory key already registered");
            return false;
        }
        self.factories.insert(key, factory);
        true
    }

    /// Removes the factory for `key`. Returns whether one was registered.
    pub fn unregister(&mut self, key: &str) -> bool {
        self.factories.remove(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn StorageFactory>> {
        self.factories.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// All registered keys, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFactory(&'static str);

    impl StorageFactory for FakeFactory {
        fn key(&self) -> &'static str {
            self.0
        }

        fn name(&self) -> &'static str {
            "Fake backend"
        }

        fn create_storage(
            &self,
            _params: &StorageParams,
        ) -> Result<Arc<dyn Storage>, StorageError> {
            Err(StorageError::OpenFailed("fake".to_string()))
        }
    }

    #[test]
    fn test_builtin_backends_are_registered() {
        let registry = StorageRegistry::with_builtin();
        assert_eq!(registry.keys(), vec!["memory", "sqlite", "vault"]);
        assert!(registry.contains("vault"));
        assert!(registry.get("vault").is_some());
        assert_eq!(registry.get("vault").unwrap().key(), "vault");
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let mut registry = StorageRegistry::new();
        assert!(registry.register(Arc::new(FakeFactory("fake"))));
        assert!(!registry.register(Arc::new(FakeFactory("fake"))));
        assert_eq!(registry.keys(), vec!["fake"]);
    }

    #[test]
    fn test_unregister() {
        let mut registry = StorageRegistry::new();
        registry.register(Arc::new(FakeFactory("fake")));
        assert!(registry.unregister("fake"));
        assert!(!registry.unregister("fake"));
        assert!(!registry.contains("fake"));
    }
}
