//! Name-to-constructor table of usable backends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use forge_storage::Storage;

use crate::backend::{Backend, DEMO_BACKEND, DemoBackend, SharedBackend};

/// Constructor for one backend variant.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn Backend> + Send + Sync>;

/// Runtime check that a variant's native dependencies are present.
pub type BackendCheck = Box<dyn FnOnce() -> Result<(), String> + Send>;

/// Registry of backends usable in this process.
///
/// Built once at startup and handed to the worker. Each name yields the
/// same instance for the registry's lifetime.
#[derive(Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    instances: Mutex<HashMap<String, SharedBackend>>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every variant compiled into this build that passes its availability check.
    pub fn discover(storage: Storage) -> Self {
        let mut registry = Self::new();

        registry.register_checked(
            DEMO_BACKEND,
            Box::new(|| Ok::<(), String>(())),
            move || -> Box<dyn Backend> { Box::new(DemoBackend::new(storage.clone())) },
        );

        tracing::info!(
            "Discovered backends: {}",
            registry.list_available().join(", ")
        );
        registry
    }

    /// Register a backend constructor under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Backend> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register `factory` only if `check` succeeds.
    ///
    /// A failing check is logged and leaves the rest of the registry untouched.
    /// Returns whether the backend was registered.
    pub fn register_checked<F>(
        &mut self,
        name: impl Into<String>,
        check: BackendCheck,
        factory: F,
    ) -> bool
    where
        F: Fn() -> Box<dyn Backend> + Send + Sync + 'static,
    {
        let name = name.into();
        match check() {
            Ok(()) => {
                self.register(name, factory);
                true
            }
            Err(reason) => {
                tracing::warn!("Backend {} unavailable: {}", name, reason);
                false
            }
        }
    }

    /// Get the instance for `name`, constructing it on first use.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = instances.get(name) {
            return Some(existing.clone());
        }

        let factory = self.factories.get(name)?;
        let backend: SharedBackend = Arc::new(tokio::sync::Mutex::new(factory()));
        instances.insert(name.to_string(), backend.clone());
        Some(backend)
    }

    /// Check if a backend is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list_available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
