use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::adapter::SharedAdapter;

type AdapterFactory = Box<dyn Fn() -> SharedAdapter + Send + Sync>;

struct Slot {
    factory: AdapterFactory,
    instance: OnceCell<SharedAdapter>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("UNKNOWN_PLATFORM: {0}")]
    UnknownPlatform(String),
}

/// Name-indexed adapter factories. Instances are built lazily on first
/// `get` and then shared for the life of the registry.
///
/// Registration happens at startup through `&mut self`; once the registry is
/// shared behind an `Arc`, only `get` and `available` are reachable.
#[derive(Default)]
pub struct AdapterRegistry {
    slots: HashMap<String, Slot>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> SharedAdapter + Send + Sync + 'static,
    {
        self.slots.insert(
            name.to_ascii_lowercase(),
            Slot {
                factory: Box::new(factory),
                instance: OnceCell::new(),
            },
        );
    }

    /// Registers an already-built adapter.
    pub fn register_instance(&mut self, name: &str, adapter: SharedAdapter) {
        let cell = OnceCell::new();
        let _ = cell.set(adapter.clone());
        self.slots.insert(
            name.to_ascii_lowercase(),
            Slot {
                factory: Box::new(move || adapter.clone()),
                instance: cell,
            },
        );
    }

    pub fn get(&self, name: &str) -> Result<SharedAdapter, RegistryError> {
        let slot = self
            .slots
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| RegistryError::UnknownPlatform(name.to_string()))?;
        Ok(Arc::clone(slot.instance.get_or_init(|| (slot.factory)())))
    }

    pub fn available(&self) -> BTreeSet<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
