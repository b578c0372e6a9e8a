//! Plugin-based driver registry
//!
//! The registry allows session drivers and convergence stores to be
//! registered at runtime by name, so the daemon picks implementations from
//! configuration instead of hardcoding them.
//!
//! ## Registration
//!
//! Transport crates register themselves during initialization:
//!
//! ```rust,ignore
//! // In the netconv-ssh crate
//! pub fn register(registry: &DriverRegistry) {
//!     registry.register_driver("ssh", Box::new(SshDriverFactory));
//! }
//! ```
//!
//! The built-in stores are registered by [`DriverRegistry::with_builtin_stores`]
//! as `"memory"` and `"file"`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{SessionConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::store::{FileStoreFactory, MemoryStoreFactory};
use crate::traits::{ConvergenceStore, ConvergenceStoreFactory, SessionDriver, SessionDriverFactory};

/// Name-to-factory registry for session drivers and convergence stores
///
/// ## Thread Safety
///
/// Interior mutability with `RwLock`: concurrent lookups, exclusive
/// registration.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn SessionDriverFactory>>>,
    stores: RwLock<HashMap<String, Arc<dyn ConvergenceStoreFactory>>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the memory and file stores already registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryStoreFactory));
        registry.register_store("file", Box::new(FileStoreFactory));
        registry
    }

    /// Register a session driver factory under `name` (e.g. "ssh")
    pub fn register_driver(&self, name: impl Into<String>, factory: Box<dyn SessionDriverFactory>) {
        self.drivers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::from(factory));
    }

    /// Register a convergence store factory under `name` (e.g. "file")
    pub fn register_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn ConvergenceStoreFactory>,
    ) {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::from(factory));
    }

    /// Create the session driver named by `config.driver`
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn SessionDriver>)`: Created driver instance
    /// - `Err(Error::Config)`: If the driver is not registered or creation fails
    pub fn create_driver(&self, config: &SessionConfig) -> Result<Box<dyn SessionDriver>> {
        let factory = self
            .drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&config.driver)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown session driver: {}", config.driver)))?;

        factory.create(config)
    }

    /// Create the convergence store described by `config`
    pub async fn create_store(&self, config: &StoreConfig) -> Result<Box<dyn ConvergenceStore>> {
        let store_type = config.type_name();

        // Clone the factory out so no lock is held across the await
        let factory = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?;

        factory.create(config).await
    }

    pub fn list_drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn list_stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn has_driver(&self, name: &str) -> bool {
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn has_store(&self, name: &str) -> bool {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
