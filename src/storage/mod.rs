//! Persistent record storage
//!
//! The store persists each entity as an independent record under a deterministic
//! string key (see [`keys`]). Backends only need atomic single-record get/set/delete.

pub mod file;
pub mod keys;

use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub use file::FileStorage;

/// Key/value backend consumed by the store
pub trait PersistentStorage: Send {
    /// Load the record stored under `key`, or [`Error::NotFound`]
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete the record stored under `key`, or [`Error::NotFound`]
    fn delete(&mut self, key: &str) -> Result<()>;
}

/// In-memory backend, used by tests and by embedders that persist elsewhere
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    records: BTreeMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl PersistentStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.records
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(key))
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.records
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(key))
    }
}
