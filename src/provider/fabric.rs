//! Fabric directory and fabric-wide removal

use tracing::{debug, info, warn};

use super::GroupDataProvider;
use crate::error::{Error, Result};
use crate::records::{relink, FabricData, FabricList, Record};
use crate::storage::PersistentStorage;
use crate::types::{FabricIndex, KeysetId};

impl FabricData {
    /// Persist the summary, linking the fabric into the directory first
    pub(crate) fn save_registered(&mut self, storage: &mut dyn PersistentStorage) -> Result<()> {
        register_fabric(storage, self)?;
        self.save(storage)
    }

    /// Delete the summary after unlinking the fabric from the directory
    pub(crate) fn delete_registered(&self, storage: &mut dyn PersistentStorage) -> Result<()> {
        unregister_fabric(storage, self.fabric_index)?;
        self.delete(storage)
    }
}

/// Prepend the fabric to the directory unless it is already linked
fn register_fabric(storage: &mut dyn PersistentStorage, fabric: &mut FabricData) -> Result<()> {
    let mut list = FabricList::load_or_empty(&*storage)?;
    let linked = list
        .fabrics(&*storage)
        .any(|l| l.record.fabric_index == fabric.fabric_index);
    if linked {
        return Ok(());
    }

    fabric.next = list.first_entry;
    list.first_entry = fabric.fabric_index;
    list.entry_count += 1;
    list.save(storage)?;
    debug!("Fabric {} registered ({} fabrics)", fabric.fabric_index, list.entry_count);
    Ok(())
}

fn unregister_fabric(storage: &mut dyn PersistentStorage, fabric_index: FabricIndex) -> Result<()> {
    let mut list = FabricList::load_or_empty(&*storage)?;
    let found = list
        .fabrics(&*storage)
        .find(|l| l.record.fabric_index == fabric_index)
        .ok_or_else(|| Error::not_found(format!("fabric {} in directory", fabric_index)))?;

    relink::<FabricData>(storage, (), found.prev, &mut list.first_entry, found.record.next)?;
    list.entry_count = list.entry_count.saturating_sub(1);
    list.save(storage)?;
    debug!("Fabric {} unregistered ({} fabrics)", fabric_index, list.entry_count);
    Ok(())
}

impl GroupDataProvider {
    /// True when the fabric is linked into the fabric directory
    pub fn validate_fabric(&self, fabric_index: FabricIndex) -> bool {
        if self.check_fabric(fabric_index).is_err() {
            return false;
        }
        match FabricList::load_or_empty(&*self.storage) {
            Ok(list) => list
                .fabrics(&*self.storage)
                .any(|l| l.record.fabric_index == fabric_index),
            Err(e) => {
                warn!("Failed to load fabric directory: {}", e);
                false
            }
        }
    }

    /// Fabrics in directory order
    pub fn fabric_indices(&self) -> Result<Vec<FabricIndex>> {
        self.check_ready()?;
        let list = FabricList::load_or_empty(&*self.storage)?;
        Ok(list
            .fabrics(&*self.storage)
            .map(|l| l.record.fabric_index)
            .collect())
    }

    /// Remove every key map, group, endpoint and keyset of a fabric, then the fabric
    /// itself. Individual failures along the way are logged and skipped.
    pub fn remove_fabric(&mut self, fabric_index: FabricIndex) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let fabric = self.fabric_data(fabric_index)?;

        for index in (0..fabric.map_count as usize).rev() {
            if let Err(e) = self.remove_group_key_at(fabric_index, index) {
                warn!("Failed to remove group key {} of fabric {}: {}", index, fabric_index, e);
            }
        }
        for index in (0..fabric.group_count as usize).rev() {
            if let Err(e) = self.remove_group_info_at(fabric_index, index) {
                warn!("Failed to remove group {} of fabric {}: {}", index, fabric_index, e);
            }
        }
        let keyset_ids: Vec<KeysetId> = fabric
            .keysets(&*self.storage)
            .map(|l| l.record.keyset_id)
            .collect();
        for keyset_id in keyset_ids {
            if let Err(e) = self.remove_keyset(fabric_index, keyset_id) {
                warn!("Failed to remove keyset {} of fabric {}: {}", keyset_id, fabric_index, e);
            }
        }

        let fabric = self.fabric_data(fabric_index)?;
        fabric.delete_registered(&mut *self.storage)?;
        info!("Fabric {} removed", fabric_index);
        Ok(())
    }
}
