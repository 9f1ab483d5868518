//! Persistent variable storage.
//!
//! The firewall does not own a persistence backend. Hosts register named
//! zones implementing [`SharedStore`]; the storage zone option selects one of
//! them. [`MemoryStore`] is the in-process implementation used by tests and
//! the CLI.

pub mod variables;

use crate::waf::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// External key-value store with per-key atomic get/set.
pub trait SharedStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
}

/// Shared in-memory zone.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.entries.write().insert(key.to_string(), value);
    }
}

/// Named store zones known to the host.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    zones: HashMap<String, Arc<dyn SharedStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, zone: &str, store: Arc<dyn SharedStore>) {
        self.zones.insert(zone.to_string(), store);
    }

    pub fn get(&self, zone: &str) -> Option<Arc<dyn SharedStore>> {
        self.zones.get(zone).cloned()
    }

    pub fn contains(&self, zone: &str) -> bool {
        self.zones.contains_key(zone)
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.zones.keys()).finish()
    }
}
