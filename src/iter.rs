//! Pooled iterators over the per-fabric lists
//!
//! Each iterator holds one slot of the provider's iterator pool for as long as it
//! lives. Factories return `None` when the pool is exhausted or the provider is not
//! initialized; a fabric without records yields an empty iterator.

use tracing::warn;

use crate::pool::PoolSlot;
use crate::provider::{keyset_summary, GroupDataProvider};
use crate::records::{EndpointData, FabricData, GroupData, KeyMapData, KeySetData, ListWalk};
use crate::storage::PersistentStorage;
use crate::types::{FabricIndex, GroupEndpoint, GroupId, GroupInfo, GroupKey, KeySet};

impl GroupDataProvider {
    fn iteration_start(&self, fabric_index: FabricIndex) -> Option<(FabricData, PoolSlot)> {
        self.check_fabric(fabric_index).ok()?;
        let fabric = match self.fabric_data(fabric_index) {
            Ok(fabric) => fabric,
            Err(e) => {
                warn!("Failed to load fabric {}: {}", fabric_index, e);
                return None;
            }
        };
        let slot = self.iterators.acquire()?;
        Some((fabric, slot))
    }

    pub fn iterate_group_infos(&self, fabric_index: FabricIndex) -> Option<GroupInfoIterator<'_>> {
        let (fabric, slot) = self.iteration_start(fabric_index)?;
        Some(GroupInfoIterator {
            total: fabric.group_count as usize,
            walk: fabric.groups(&*self.storage),
            _slot: slot,
        })
    }

    /// Endpoints of every group of the fabric, or of `group_id` only
    pub fn iterate_endpoints(&self, fabric_index: FabricIndex, group_id: Option<GroupId>) -> Option<EndpointIterator<'_>> {
        let (fabric, slot) = self.iteration_start(fabric_index)?;
        let storage = &*self.storage;
        let total = fabric
            .groups(storage)
            .filter(|l| group_id.map_or(true, |id| l.record.group_id == id))
            .map(|l| l.record.endpoint_count as usize)
            .sum();
        Some(EndpointIterator {
            storage,
            filter: group_id,
            groups: fabric.groups(storage),
            current: None,
            total,
            _slot: slot,
        })
    }

    pub fn iterate_group_keys(&self, fabric_index: FabricIndex) -> Option<GroupKeyIterator<'_>> {
        let (fabric, slot) = self.iteration_start(fabric_index)?;
        Some(GroupKeyIterator {
            total: fabric.map_count as usize,
            walk: fabric.maps(&*self.storage),
            _slot: slot,
        })
    }

    /// Keysets of the fabric with start times only
    pub fn iterate_keysets(&self, fabric_index: FabricIndex) -> Option<KeySetIterator<'_>> {
        let (fabric, slot) = self.iteration_start(fabric_index)?;
        Some(KeySetIterator {
            total: fabric.keyset_count as usize,
            walk: fabric.keysets(&*self.storage),
            _slot: slot,
        })
    }
}

pub struct GroupInfoIterator<'a> {
    walk: ListWalk<'a, GroupData>,
    total: usize,
    _slot: PoolSlot,
}

impl GroupInfoIterator<'_> {
    /// Number of groups in the fabric
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn release(self) {}
}

impl Iterator for GroupInfoIterator<'_> {
    type Item = GroupInfo;

    fn next(&mut self) -> Option<GroupInfo> {
        self.walk.next().map(|l| GroupInfo {
            group_id: l.record.group_id,
            name: l.record.name,
        })
    }
}

pub struct EndpointIterator<'a> {
    storage: &'a dyn PersistentStorage,
    filter: Option<GroupId>,
    groups: ListWalk<'a, GroupData>,
    current: Option<(GroupId, ListWalk<'a, EndpointData>)>,
    total: usize,
    _slot: PoolSlot,
}

impl EndpointIterator<'_> {
    /// Number of memberships covered by the iterator
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn release(self) {}
}

impl Iterator for EndpointIterator<'_> {
    type Item = GroupEndpoint;

    fn next(&mut self) -> Option<GroupEndpoint> {
        loop {
            if let Some((group_id, endpoints)) = &mut self.current {
                if let Some(endpoint) = endpoints.next() {
                    return Some(GroupEndpoint {
                        group_id: *group_id,
                        endpoint_id: endpoint.record.endpoint_id,
                    });
                }
                self.current = None;
            }

            let filter = self.filter;
            let group = self
                .groups
                .find(|l| filter.map_or(true, |id| l.record.group_id == id))?;
            self.current = Some((group.record.group_id, group.record.endpoints(self.storage)));
        }
    }
}

pub struct GroupKeyIterator<'a> {
    walk: ListWalk<'a, KeyMapData>,
    total: usize,
    _slot: PoolSlot,
}

impl GroupKeyIterator<'_> {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn release(self) {}
}

impl Iterator for GroupKeyIterator<'_> {
    type Item = GroupKey;

    fn next(&mut self) -> Option<GroupKey> {
        self.walk
            .next()
            .map(|l| GroupKey::new(l.record.group_id, l.record.keyset_id))
    }
}

pub struct KeySetIterator<'a> {
    walk: ListWalk<'a, KeySetData>,
    total: usize,
    _slot: PoolSlot,
}

impl KeySetIterator<'_> {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn release(self) {}
}

impl Iterator for KeySetIterator<'_> {
    type Item = KeySet;

    fn next(&mut self) -> Option<KeySet> {
        self.walk.next().map(|l| keyset_summary(&l.record))
    }
}
