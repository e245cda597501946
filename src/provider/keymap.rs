//! Group to keyset mappings

use tracing::{debug, warn};

use super::GroupDataProvider;
use crate::error::{Error, Result};
use crate::records::{relink, FabricData, KeyMapData, Located, Record};
use crate::types::{FabricIndex, GroupKey, KeysetId};

impl GroupDataProvider {
    fn map_at(&self, fabric: &FabricData, index: usize) -> Result<Located<KeyMapData>> {
        fabric.maps(&*self.storage).nth(index).ok_or_else(|| {
            Error::not_found(format!("group key index {} of fabric {}", index, fabric.fabric_index))
        })
    }

    /// Write a mapping at a list position, updating it in place when the position is
    /// taken and appending when `index` equals the number of mappings
    pub fn set_group_key_at(&mut self, fabric_index: FabricIndex, index: usize, key: &GroupKey) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let mut fabric = self.fabric_data(fabric_index)?;

        let existing = fabric
            .maps(&*self.storage)
            .find(|l| l.record.group_id == key.group_id && l.record.keyset_id == key.keyset_id);
        if let Some(existing) = existing {
            if existing.index == index {
                return Ok(());
            }
            return Err(Error::DuplicateKeyId(format!(
                "group 0x{:04x} -> keyset {} already at index {}",
                key.group_id, key.keyset_id, existing.index
            )));
        }

        let count = fabric.map_count as usize;
        if index < count {
            let mut map = self.map_at(&fabric, index)?;
            map.record.group_id = key.group_id;
            map.record.keyset_id = key.keyset_id;
            return map.record.save(&mut *self.storage);
        }
        if index > count {
            return Err(Error::InvalidArgument(format!(
                "group key index {} past end of list ({} entries)",
                index, count
            )));
        }
        if count >= self.limits.max_groups_per_fabric {
            return Err(Error::InvalidListLength {
                what: "group keys",
                max: self.limits.max_groups_per_fabric,
            });
        }

        // Link ids are never handed out twice within a fabric
        let mut max_id = fabric.last_map_id;
        let mut last = None;
        for map in fabric.maps(&*self.storage) {
            max_id = max_id.max(map.record.id);
            last = Some(map.record.id);
        }
        let id = max_id
            .checked_add(1)
            .ok_or_else(|| Error::internal(format!("group key ids exhausted in fabric {}", fabric_index)))?;

        let mut map = KeyMapData::new(fabric_index, id);
        map.group_id = key.group_id;
        map.keyset_id = key.keyset_id;
        map.save(&mut *self.storage)?;
        relink::<KeyMapData>(&mut *self.storage, fabric_index, last, &mut fabric.first_map, id)?;
        fabric.map_count += 1;
        fabric.last_map_id = id;
        fabric.save_registered(&mut *self.storage)?;
        debug!(
            "Group 0x{:04x} mapped to keyset {} in fabric {}",
            key.group_id, key.keyset_id, fabric_index
        );
        Ok(())
    }

    pub fn get_group_key_at(&self, fabric_index: FabricIndex, index: usize) -> Result<GroupKey> {
        self.check_fabric(fabric_index)?;
        let fabric = self.fabric_data(fabric_index)?;
        let map = self.map_at(&fabric, index)?;
        Ok(GroupKey::new(map.record.group_id, map.record.keyset_id))
    }

    pub fn remove_group_key_at(&mut self, fabric_index: FabricIndex, index: usize) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let mut fabric = self.fabric_data(fabric_index)?;
        let map = self.map_at(&fabric, index)?;

        map.record.delete(&mut *self.storage)?;
        relink::<KeyMapData>(
            &mut *self.storage,
            fabric_index,
            map.prev,
            &mut fabric.first_map,
            map.record.next,
        )?;
        fabric.map_count = fabric.map_count.saturating_sub(1);
        fabric.save_registered(&mut *self.storage)
    }

    /// Remove every mapping of the fabric
    pub fn remove_group_keys(&mut self, fabric_index: FabricIndex) -> Result<()> {
        self.check_fabric(fabric_index)?;
        let mut fabric = self.fabric_data(fabric_index)?;
        let maps: Vec<KeyMapData> = fabric.maps(&*self.storage).map(|l| l.record).collect();
        for map in maps {
            if let Err(e) = map.delete(&mut *self.storage) {
                warn!("Failed to delete group key {} of fabric {}: {}", map.id, fabric_index, e);
            }
        }
        fabric.first_map = 0;
        fabric.map_count = 0;
        fabric.save_registered(&mut *self.storage)
    }

    /// Position of a mapping equal to `key`
    pub fn find_group_key(&self, fabric_index: FabricIndex, key: &GroupKey) -> Option<usize> {
        self.check_fabric(fabric_index).ok()?;
        let fabric = self.fabric_data(fabric_index).ok()?;
        let found = fabric
            .maps(&*self.storage)
            .find(|l| l.record.group_id == key.group_id && l.record.keyset_id == key.keyset_id);
        found.map(|l| l.index)
    }

    /// Position of the first mapping that uses `keyset_id`
    pub fn find_keyset_mapping(&self, fabric_index: FabricIndex, keyset_id: KeysetId) -> Option<usize> {
        self.check_fabric(fabric_index).ok()?;
        let fabric = self.fabric_data(fabric_index).ok()?;
        let found = fabric
            .maps(&*self.storage)
            .find(|l| l.record.keyset_id == keyset_id);
        found.map(|l| l.index)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Limits;
    use super::*;
    use crate::storage::keys;
    use crate::types::GroupId;

    fn group_keys(provider: &GroupDataProvider, fabric_index: FabricIndex) -> Vec<(GroupId, KeysetId)> {
        let count = provider.fabric_data(fabric_index).unwrap().map_count as usize;
        (0..count)
            .map(|i| {
                let key = provider.get_group_key_at(fabric_index, i).unwrap();
                (key.group_id, key.keyset_id)
            })
            .collect()
    }

    #[test]
    fn test_append_update_and_read_back() {
        let mut provider = provider();
        provider.set_group_key_at(1, 0, &GroupKey::new(7, 5)).unwrap();
        provider.set_group_key_at(1, 1, &GroupKey::new(8, 5)).unwrap();
        provider.set_group_key_at(1, 2, &GroupKey::new(7, 6)).unwrap();
        assert_eq!(group_keys(&provider, 1), vec![(7, 5), (8, 5), (7, 6)]);

        provider.set_group_key_at(1, 1, &GroupKey::new(9, 2)).unwrap();
        assert_eq!(group_keys(&provider, 1), vec![(7, 5), (9, 2), (7, 6)]);

        // Same pair at the same index is accepted as-is
        provider.set_group_key_at(1, 0, &GroupKey::new(7, 5)).unwrap();
        assert!(provider.get_group_key_at(1, 3).unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_pair_and_gap_rejected() {
        let mut provider = provider();
        provider.set_group_key_at(1, 0, &GroupKey::new(7, 5)).unwrap();
        provider.set_group_key_at(1, 1, &GroupKey::new(8, 5)).unwrap();

        assert!(matches!(
            provider.set_group_key_at(1, 1, &GroupKey::new(7, 5)),
            Err(Error::DuplicateKeyId(_))
        ));
        assert!(matches!(
            provider.set_group_key_at(1, 3, &GroupKey::new(9, 5)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_capacity_uses_group_limit() {
        let mut provider = provider_with(Limits {
            max_groups_per_fabric: 2,
            ..Limits::default()
        });
        provider.set_group_key_at(1, 0, &GroupKey::new(7, 5)).unwrap();
        provider.set_group_key_at(1, 1, &GroupKey::new(8, 5)).unwrap();
        assert!(matches!(
            provider.set_group_key_at(1, 2, &GroupKey::new(9, 5)),
            Err(Error::InvalidListLength { .. })
        ));
        assert_eq!(provider.fabric_data(1).unwrap().map_count, 2);
    }

    #[test]
    fn test_link_id_not_reused_after_tail_removal() {
        let mut provider = provider();
        provider.set_group_key_at(1, 0, &GroupKey::new(7, 5)).unwrap();
        provider.set_group_key_at(1, 1, &GroupKey::new(8, 5)).unwrap();
        provider.remove_group_key_at(1, 1).unwrap();
        provider.set_group_key_at(1, 1, &GroupKey::new(9, 6)).unwrap();

        let storage = provider.storage();
        assert!(storage.get(&keys::fabric_group_key(1, 1)).is_ok());
        assert!(storage.get(&keys::fabric_group_key(1, 2)).is_err());
        assert!(storage.get(&keys::fabric_group_key(1, 3)).is_ok());
        assert_eq!(group_keys(&provider, 1), vec![(7, 5), (9, 6)]);
        assert_eq!(provider.fabric_data(1).unwrap().last_map_id, 3);
    }

    #[test]
    fn test_link_id_not_reused_after_drain() {
        let mut provider = provider();
        provider.set_group_key_at(1, 0, &GroupKey::new(7, 5)).unwrap();
        provider.set_group_key_at(1, 1, &GroupKey::new(8, 5)).unwrap();
        provider.remove_group_keys(1).unwrap();
        provider.set_group_key_at(1, 0, &GroupKey::new(9, 5)).unwrap();

        let storage = provider.storage();
        assert!(storage.get(&keys::fabric_group_key(1, 1)).is_err());
        assert!(storage.get(&keys::fabric_group_key(1, 3)).is_ok());
    }

    #[test]
    fn test_remove_relinks_head_middle_tail() {
        let mut provider = provider();
        for (i, group) in [7u16, 8, 9, 10].iter().enumerate() {
            provider.set_group_key_at(1, i, &GroupKey::new(*group, 1)).unwrap();
        }
        provider.remove_group_key_at(1, 1).unwrap();
        assert_eq!(group_keys(&provider, 1), vec![(7, 1), (9, 1), (10, 1)]);
        provider.remove_group_key_at(1, 2).unwrap();
        provider.remove_group_key_at(1, 0).unwrap();
        assert_eq!(group_keys(&provider, 1), vec![(9, 1)]);
        assert!(provider.remove_group_key_at(1, 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_group_keys_drains() {
        let mut provider = provider();
        provider.set_group_key_at(1, 0, &GroupKey::new(7, 5)).unwrap();
        provider.set_group_key_at(1, 1, &GroupKey::new(8, 6)).unwrap();
        provider.remove_group_keys(1).unwrap();

        let fabric = provider.fabric_data(1).unwrap();
        assert_eq!(fabric.map_count, 0);
        assert_eq!(fabric.first_map, 0);
        assert!(provider.storage().get(&keys::fabric_group_key(1, 1)).is_err());
        assert!(provider.storage().get(&keys::fabric_group_key(1, 2)).is_err());
        provider.set_group_key_at(1, 0, &GroupKey::new(9, 5)).unwrap();
        assert_eq!(group_keys(&provider, 1), vec![(9, 5)]);
    }

    #[test]
    fn test_find_by_pair_and_keyset() {
        let mut provider = provider();
        provider.set_group_key_at(1, 0, &GroupKey::new(7, 5)).unwrap();
        provider.set_group_key_at(1, 1, &GroupKey::new(8, 6)).unwrap();
        provider.set_group_key_at(1, 2, &GroupKey::new(9, 6)).unwrap();

        assert_eq!(provider.find_group_key(1, &GroupKey::new(8, 6)), Some(1));
        assert_eq!(provider.find_group_key(1, &GroupKey::new(8, 5)), None);
        assert_eq!(provider.find_keyset_mapping(1, 6), Some(1));
        assert_eq!(provider.find_keyset_mapping(1, 4), None);
        assert_eq!(provider.find_keyset_mapping(2, 6), None);
    }
}
