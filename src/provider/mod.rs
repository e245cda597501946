//! Group data provider
//!
//! The façade over the persisted group, endpoint, key map and keyset lists of every
//! fabric. Mutations take `&mut self` and write child records before the parent
//! summary, so an interrupted operation leaves at worst an orphaned child record.
//! Iterators borrow the provider immutably and draw from a bounded slot pool.

mod fabric;
mod groups;
mod keymap;
mod keysets;
mod sessions;

pub(crate) use keysets::keyset_summary;
pub use sessions::GroupSessionIterator;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crypto::CryptoProvider;
use crate::error::{Error, Result};
use crate::pool::SlotPool;
use crate::records::FabricData;
use crate::storage::PersistentStorage;
use crate::types::{FabricIndex, GroupInfo, KeysetId, INVALID_KEYSET_ID, UNDEFINED_FABRIC_INDEX};

/// Per-fabric capacities and pool sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_groups_per_fabric: usize,
    pub max_group_keys_per_fabric: usize,
    /// Iterators of all kinds that may be outstanding at once
    pub iterators_max: usize,
    pub key_contexts_max: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_groups_per_fabric: 4,
            max_group_keys_per_fabric: 3,
            iterators_max: 2,
            key_contexts_max: 2,
        }
    }
}

/// Notified after a group record is created or removed
pub trait GroupListener: Send {
    fn on_group_added(&self, fabric_index: FabricIndex, group: &GroupInfo);
    fn on_group_removed(&self, fabric_index: FabricIndex, group: &GroupInfo);
}

pub struct GroupDataProvider {
    pub(crate) storage: Box<dyn PersistentStorage>,
    pub(crate) crypto: Arc<dyn CryptoProvider>,
    pub(crate) limits: Limits,
    listener: Option<Box<dyn GroupListener>>,
    pub(crate) iterators: SlotPool,
    pub(crate) key_contexts: SlotPool,
    initialized: bool,
}

impl GroupDataProvider {
    pub fn new(storage: Box<dyn PersistentStorage>, crypto: Arc<dyn CryptoProvider>, limits: Limits) -> Self {
        Self {
            storage,
            crypto,
            limits,
            listener: None,
            iterators: SlotPool::new("iterator", limits.iterators_max),
            key_contexts: SlotPool::new("key context", limits.key_contexts_max),
            initialized: false,
        }
    }

    pub fn init(&mut self) {
        self.initialized = true;
        info!(
            "Group data provider ready (groups/fabric: {}, keysets/fabric: {})",
            self.limits.max_groups_per_fabric, self.limits.max_group_keys_per_fabric
        );
    }

    /// Stop serving requests and reclaim every outstanding pool slot
    pub fn finish(&mut self) {
        self.iterators.reset();
        self.key_contexts.reset();
        self.initialized = false;
        debug!("Group data provider finished");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_listener(&mut self, listener: Box<dyn GroupListener>) {
        self.listener = Some(listener);
    }

    pub fn storage(&self) -> &dyn PersistentStorage {
        &*self.storage
    }

    /// Iterators currently holding a pool slot
    pub fn iterators_in_use(&self) -> usize {
        self.iterators.in_use()
    }

    pub fn key_contexts_in_use(&self) -> usize {
        self.key_contexts.in_use()
    }

    pub(crate) fn check_ready(&self) -> Result<()> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    pub(crate) fn check_fabric(&self, fabric_index: FabricIndex) -> Result<()> {
        self.check_ready()?;
        if fabric_index == UNDEFINED_FABRIC_INDEX {
            return Err(Error::InvalidFabricIndex(fabric_index));
        }
        Ok(())
    }

    pub(crate) fn check_keyset_id(keyset_id: KeysetId) -> Result<()> {
        if keyset_id == INVALID_KEYSET_ID {
            return Err(Error::InvalidKeyId(keyset_id));
        }
        Ok(())
    }

    /// Summary of a fabric, empty if the fabric has no records yet
    pub(crate) fn fabric_data(&self, fabric_index: FabricIndex) -> Result<FabricData> {
        FabricData::load_or_empty(&*self.storage, fabric_index)
    }

    fn notify_added(&self, fabric_index: FabricIndex, group: &GroupInfo) {
        debug!("Group 0x{:04x} added to fabric {}", group.group_id, fabric_index);
        if let Some(listener) = &self.listener {
            listener.on_group_added(fabric_index, group);
        }
    }

    fn notify_removed(&self, fabric_index: FabricIndex, group: &GroupInfo) {
        debug!("Group 0x{:04x} removed from fabric {}", group.group_id, fabric_index);
        if let Some(listener) = &self.listener {
            listener.on_group_removed(fabric_index, group);
        }
    }
}
