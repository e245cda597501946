//! Keysets and their derived operational credentials

use tracing::{debug, warn};

use super::GroupDataProvider;
use crate::error::{Error, Result};
use crate::records::{relink, FabricData, KeySetData, Located, Record};
use crate::storage::PersistentStorage;
use crate::types::{
    CompressedFabricId, EpochKey, FabricIndex, KeySet, KeysetId, EPOCH_KEYS_MAX, IPK_KEYSET_ID,
};

pub(crate) fn find_keyset(
    storage: &dyn PersistentStorage,
    fabric: &FabricData,
    keyset_id: KeysetId,
) -> Option<Located<KeySetData>> {
    fabric
        .keysets(storage)
        .find(|l| l.record.keyset_id == keyset_id)
}

/// Public view of a stored keyset: start times only
pub(crate) fn keyset_summary(data: &KeySetData) -> KeySet {
    let mut keyset = KeySet {
        keyset_id: data.keyset_id,
        policy: data.policy,
        num_keys_used: data.keys_count,
        epoch_keys: Default::default(),
    };
    for (epoch, creds) in keyset.epoch_keys.iter_mut().zip(data.used_keys()) {
        epoch.start_time = creds.start_time;
    }
    keyset
}

impl GroupDataProvider {
    fn keyset_in(&self, fabric: &FabricData, keyset_id: KeysetId) -> Result<Located<KeySetData>> {
        find_keyset(&*self.storage, fabric, keyset_id).ok_or_else(|| {
            Error::not_found(format!("keyset {} in fabric {}", keyset_id, fabric.fabric_index))
        })
    }

    /// Derive and store the operational credentials of a keyset.
    ///
    /// Epoch keys are not persisted. An existing keyset with the same id is overwritten
    /// in place; a new one is prepended to the fabric's keyset list.
    pub fn set_keyset(
        &mut self,
        fabric_index: FabricIndex,
        compressed_fabric_id: CompressedFabricId,
        keyset: &KeySet,
    ) -> Result<()> {
        self.check_fabric(fabric_index)?;
        Self::check_keyset_id(keyset.keyset_id)?;
        if keyset.num_keys_used as usize > EPOCH_KEYS_MAX {
            return Err(Error::InvalidArgument(format!(
                "keyset {} uses {} keys, at most {} allowed",
                keyset.keyset_id, keyset.num_keys_used, EPOCH_KEYS_MAX
            )));
        }
        let mut fabric = self.fabric_data(fabric_index)?;

        let mut data = KeySetData::new(fabric_index, keyset.keyset_id);
        data.policy = keyset.policy;
        data.keys_count = keyset.num_keys_used;
        let used = keyset.num_keys_used as usize;
        for (slot, epoch) in data.operational_keys.iter_mut().zip(&keyset.epoch_keys).take(used) {
            *slot = self
                .crypto
                .derive_group_operational_credentials(&epoch.key, compressed_fabric_id)?;
            slot.start_time = epoch.start_time;
        }

        let existing = find_keyset(&*self.storage, &fabric, keyset.keyset_id);
        if let Some(existing) = existing {
            data.next = existing.record.next;
            data.save(&mut *self.storage)?;
            debug!("Keyset {} of fabric {} updated", keyset.keyset_id, fabric_index);
            return Ok(());
        }

        if fabric.keyset_count as usize >= self.limits.max_group_keys_per_fabric {
            return Err(Error::InvalidListLength {
                what: "keysets",
                max: self.limits.max_group_keys_per_fabric,
            });
        }
        data.next = fabric.first_keyset;
        data.save(&mut *self.storage)?;
        fabric.first_keyset = keyset.keyset_id;
        fabric.keyset_count += 1;
        fabric.save_registered(&mut *self.storage)?;
        debug!(
            "Keyset {} added to fabric {} ({} keys)",
            keyset.keyset_id, fabric_index, keyset.num_keys_used
        );
        Ok(())
    }

    /// Policy and epoch start times of a keyset. Key bytes are left zeroed.
    pub fn get_keyset(&self, fabric_index: FabricIndex, keyset_id: KeysetId) -> Result<KeySet> {
        self.check_fabric(fabric_index)?;
        Self::check_keyset_id(keyset_id)?;
        let fabric = self.fabric_data(fabric_index)?;
        Ok(keyset_summary(&self.keyset_in(&fabric, keyset_id)?.record))
    }

    /// The IPK keyset, with each epoch key slot carrying the derived encryption key
    pub fn get_ipk_keyset(&self, fabric_index: FabricIndex) -> Result<KeySet> {
        self.check_fabric(fabric_index)?;
        let fabric = self.fabric_data(fabric_index)?;
        let data = self.keyset_in(&fabric, IPK_KEYSET_ID)?.record;

        let mut keyset = keyset_summary(&data);
        for (epoch, creds) in keyset.epoch_keys.iter_mut().zip(data.used_keys()) {
            *epoch = EpochKey::new(creds.start_time, creds.encryption_key);
        }
        Ok(keyset)
    }

    /// Remove a keyset and every group key mapping that references it.
    ///
    /// Mapping removal is best effort: failures are logged and the keyset stays removed.
    pub fn remove_keyset(&mut self, fabric_index: FabricIndex, keyset_id: KeysetId) -> Result<()> {
        self.check_fabric(fabric_index)?;
        Self::check_keyset_id(keyset_id)?;
        let mut fabric = self.fabric_data(fabric_index)?;
        let found = self.keyset_in(&fabric, keyset_id)?;

        found.record.delete(&mut *self.storage)?;
        relink::<KeySetData>(
            &mut *self.storage,
            fabric_index,
            found.prev,
            &mut fabric.first_keyset,
            found.record.next,
        )?;
        fabric.keyset_count = fabric.keyset_count.saturating_sub(1);
        fabric.save_registered(&mut *self.storage)?;

        // Highest position first, so earlier positions stay valid after each removal
        let indices: Vec<usize> = fabric
            .maps(&*self.storage)
            .filter(|l| l.record.keyset_id == keyset_id)
            .map(|l| l.index)
            .collect();
        for index in indices.into_iter().rev() {
            if let Err(e) = self.remove_group_key_at(fabric_index, index) {
                warn!(
                    "Failed to remove group key {} for keyset {} of fabric {}: {}",
                    index, keyset_id, fabric_index, e
                );
            }
        }
        debug!("Keyset {} removed from fabric {}", keyset_id, fabric_index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Limits;
    use super::*;
    use crate::crypto::{AesCryptoProvider, CryptoProvider};
    use crate::storage::keys;
    use crate::types::{GroupKey, SecurityPolicy, INVALID_KEYSET_ID};

    #[test]
    fn test_set_and_get_keyset_hides_keys() {
        let mut provider = provider();
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(5, 3)).unwrap();

        let stored = provider.get_keyset(1, 5).unwrap();
        assert_eq!(stored.keyset_id, 5);
        assert_eq!(stored.num_keys_used, 3);
        assert_eq!(stored.policy, SecurityPolicy::TrustFirst);
        let start_times: Vec<u64> = stored.epoch_keys.iter().map(|k| k.start_time).collect();
        assert_eq!(start_times, vec![1_000_000, 2_000_000, 3_000_000]);
        assert!(stored.epoch_keys.iter().all(|k| k.key == [0u8; 16]));
    }

    #[test]
    fn test_persisted_record_holds_derived_keys_only() {
        let mut provider = provider();
        let input = keyset(5, 1);
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &input).unwrap();

        let fabric = provider.fabric_data(1).unwrap();
        let data = find_keyset(provider.storage(), &fabric, 5).unwrap().record;
        let expected = AesCryptoProvider::new()
            .derive_group_operational_credentials(&input.epoch_keys[0].key, COMPRESSED_FABRIC_ID)
            .unwrap();
        assert_eq!(data.operational_keys[0].encryption_key, expected.encryption_key);
        assert_eq!(data.operational_keys[0].hash, expected.hash);
        assert_ne!(data.operational_keys[0].encryption_key, input.epoch_keys[0].key);

        let raw = provider.storage().get(&keys::fabric_keyset(1, 5)).unwrap();
        assert!(!raw
            .windows(16)
            .any(|w| w == input.epoch_keys[0].key.as_slice()));
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut provider = provider();
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(1, 1)).unwrap();
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(2, 1)).unwrap();
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(3, 1)).unwrap();

        let mut updated = keyset(2, 2);
        updated.policy = SecurityPolicy::CacheAndSync;
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &updated).unwrap();

        let fabric = provider.fabric_data(1).unwrap();
        assert_eq!(fabric.keyset_count, 3);
        let order: Vec<_> = fabric
            .keysets(provider.storage())
            .map(|l| l.record.keyset_id)
            .collect();
        assert_eq!(order, vec![3, 2, 1]);
        let stored = provider.get_keyset(1, 2).unwrap();
        assert_eq!(stored.policy, SecurityPolicy::CacheAndSync);
        assert_eq!(stored.num_keys_used, 2);
    }

    #[test]
    fn test_keyset_capacity() {
        let mut provider = provider_with(Limits {
            max_group_keys_per_fabric: 2,
            ..Limits::default()
        });
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(1, 1)).unwrap();
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(2, 1)).unwrap();
        assert!(matches!(
            provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(3, 1)),
            Err(Error::InvalidListLength { what: "keysets", .. })
        ));
        // Updating an existing keyset is still allowed when full
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(2, 3)).unwrap();
        assert!(provider.storage().get(&keys::fabric_keyset(1, 3)).is_err());
    }

    #[test]
    fn test_invalid_keyset_id() {
        let mut provider = provider();
        assert!(matches!(
            provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(INVALID_KEYSET_ID, 1)),
            Err(Error::InvalidKeyId(INVALID_KEYSET_ID))
        ));
        assert!(matches!(
            provider.get_keyset(1, INVALID_KEYSET_ID),
            Err(Error::InvalidKeyId(_))
        ));
    }

    #[test]
    fn test_ipk_keyset_exposes_encryption_keys() {
        let mut provider = provider();
        assert!(provider.get_ipk_keyset(1).unwrap_err().is_not_found());

        let input = keyset(IPK_KEYSET_ID, 1);
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &input).unwrap();

        let ipk = provider.get_ipk_keyset(1).unwrap();
        let expected = AesCryptoProvider::new()
            .derive_group_operational_credentials(&input.epoch_keys[0].key, COMPRESSED_FABRIC_ID)
            .unwrap();
        assert_eq!(ipk.num_keys_used, 1);
        assert_eq!(ipk.epoch_keys[0].start_time, 1_000_000);
        assert_eq!(ipk.epoch_keys[0].key, expected.encryption_key);
    }

    #[test]
    fn test_remove_keyset_cascades_mappings() {
        let mut provider = provider();
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(5, 3)).unwrap();
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(6, 1)).unwrap();
        provider.set_group_key_at(1, 0, &GroupKey::new(7, 5)).unwrap();
        provider.set_group_key_at(1, 1, &GroupKey::new(8, 6)).unwrap();
        provider.set_group_key_at(1, 2, &GroupKey::new(9, 5)).unwrap();
        assert!(provider.get_key_context(1, 7).is_some());

        provider.remove_keyset(1, 5).unwrap();

        let count = provider.fabric_data(1).unwrap().map_count as usize;
        let remaining: Vec<GroupKey> = (0..count)
            .map(|i| provider.get_group_key_at(1, i).unwrap())
            .collect();
        assert_eq!(remaining, vec![GroupKey::new(8, 6)]);
        assert!(remaining.iter().all(|k| k.keyset_id != 5));
        assert!(provider.get_key_context(1, 7).is_none());
        assert!(provider.get_keyset(1, 5).unwrap_err().is_not_found());
        assert_eq!(provider.fabric_data(1).unwrap().keyset_count, 1);
        assert!(provider.remove_keyset(1, 5).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_keyset_survives_failed_mapping_delete() {
        // Mapping (8, 5) gets link id 2
        let mut provider = provider_over(Box::new(FailingStorage::new(keys::fabric_group_key(1, 2))));
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(5, 1)).unwrap();
        provider.set_keyset(1, COMPRESSED_FABRIC_ID, &keyset(6, 1)).unwrap();
        provider.set_group_key_at(1, 0, &GroupKey::new(7, 5)).unwrap();
        provider.set_group_key_at(1, 1, &GroupKey::new(8, 5)).unwrap();
        provider.set_group_key_at(1, 2, &GroupKey::new(8, 6)).unwrap();
        provider.set_group_key_at(1, 3, &GroupKey::new(9, 5)).unwrap();

        provider.remove_keyset(1, 5).unwrap();

        assert!(provider.get_keyset(1, 5).unwrap_err().is_not_found());
        assert_eq!(provider.fabric_data(1).unwrap().keyset_count, 1);
        let count = provider.fabric_data(1).unwrap().map_count as usize;
        let remaining: Vec<GroupKey> = (0..count)
            .map(|i| provider.get_group_key_at(1, i).unwrap())
            .collect();
        assert_eq!(remaining, vec![GroupKey::new(8, 5), GroupKey::new(8, 6)]);
        assert!(provider.storage().get(&keys::fabric_group_key(1, 1)).is_err());
        assert!(provider.storage().get(&keys::fabric_group_key(1, 4)).is_err());
    }
}
