//! Key contexts and resolution of incoming group session ids

use std::sync::Arc;

use tracing::{debug, warn};

use super::keysets::find_keyset;
use super::GroupDataProvider;
use crate::context::GroupKeyContext;
use crate::crypto::CryptoProvider;
use crate::pool::PoolSlot;
use crate::records::{FabricData, FabricList, KeyMapData, KeySetData, ListWalk};
use crate::storage::PersistentStorage;
use crate::types::{FabricIndex, GroupId, GroupSession, IPK_KEYSET_ID};

impl GroupDataProvider {
    /// Context for sending to a group, built from the current credentials of the first
    /// non-IPK keyset mapped to it that exists and has a usable key. `None` when no
    /// mapping qualifies or the key context pool is exhausted.
    pub fn get_key_context(&self, fabric_index: FabricIndex, group_id: GroupId) -> Option<GroupKeyContext> {
        self.check_fabric(fabric_index).ok()?;
        let fabric = match self.fabric_data(fabric_index) {
            Ok(fabric) => fabric,
            Err(e) => {
                warn!("Failed to load fabric {}: {}", fabric_index, e);
                return None;
            }
        };

        let credentials = fabric
            .maps(&*self.storage)
            .filter(|l| l.record.group_id == group_id && l.record.keyset_id != IPK_KEYSET_ID)
            .find_map(|l| {
                let keyset = find_keyset(&*self.storage, &fabric, l.record.keyset_id)?.record;
                keyset.current_credentials().cloned()
            })?;

        let slot = self.key_contexts.acquire()?;
        match GroupKeyContext::new(&credentials, Arc::clone(&self.crypto), Some(Arc::new(slot))) {
            Ok(context) => Some(context),
            Err(e) => {
                warn!("Failed to build key context for group 0x{:04x}: {}", group_id, e);
                None
            }
        }
    }

    /// Every group session across all fabrics whose credential hash equals
    /// `session_id`. `None` when the iterator pool is exhausted.
    pub fn iterate_group_sessions(&self, session_id: u16) -> Option<GroupSessionIterator<'_>> {
        self.check_ready().ok()?;
        let list = match FabricList::load_or_empty(&*self.storage) {
            Ok(list) => list,
            Err(e) => {
                warn!("Failed to load fabric directory: {}", e);
                return None;
            }
        };
        let slot = self.iterators.acquire()?;
        let cursor = SessionCursor::new(&*self.storage, &list);
        Some(GroupSessionIterator {
            storage: &*self.storage,
            crypto: Arc::clone(&self.crypto),
            session_id,
            list,
            cursor,
            slot: Arc::new(slot),
        })
    }
}

/// Position of a fabric × key map × key slot walk
struct SessionCursor<'a> {
    storage: &'a dyn PersistentStorage,
    fabrics: ListWalk<'a, FabricData>,
    maps: Option<(FabricData, ListWalk<'a, KeyMapData>)>,
    keyset: Option<(FabricIndex, GroupId, KeySetData)>,
    slot: usize,
}

/// A key slot whose hash matched
struct SessionMatch {
    fabric_index: FabricIndex,
    group_id: GroupId,
    keyset: KeySetData,
    slot: usize,
}

impl<'a> SessionCursor<'a> {
    fn new(storage: &'a dyn PersistentStorage, list: &FabricList) -> Self {
        Self {
            storage,
            fabrics: list.fabrics(storage),
            maps: None,
            keyset: None,
            slot: 0,
        }
    }

    fn next_match(&mut self, session_id: u16) -> Option<SessionMatch> {
        loop {
            if let Some((fabric_index, group_id, keyset)) = &self.keyset {
                while self.slot < keyset.used_keys().len() {
                    let slot = self.slot;
                    self.slot += 1;
                    if keyset.operational_keys[slot].hash == session_id {
                        return Some(SessionMatch {
                            fabric_index: *fabric_index,
                            group_id: *group_id,
                            keyset: keyset.clone(),
                            slot,
                        });
                    }
                }
                self.keyset = None;
            }

            if let Some((fabric, maps)) = &mut self.maps {
                match maps.next() {
                    Some(map) if map.record.keyset_id == IPK_KEYSET_ID => {}
                    Some(map) => {
                        let keyset = find_keyset(self.storage, fabric, map.record.keyset_id);
                        match keyset {
                            Some(keyset) => {
                                self.keyset = Some((fabric.fabric_index, map.record.group_id, keyset.record));
                                self.slot = 0;
                            }
                            None => debug!(
                                "Keyset {} mapped to group 0x{:04x} is missing",
                                map.record.keyset_id, map.record.group_id
                            ),
                        }
                    }
                    None => self.maps = None,
                }
                continue;
            }

            let fabric = self.fabrics.next()?.record;
            let maps = fabric.maps(self.storage);
            self.maps = Some((fabric, maps));
        }
    }
}

/// Lazy cursor over the group sessions matching one session id.
///
/// Yielded sessions carry key contexts that share this iterator's pool slot, so the
/// slot is returned only once the iterator and all of its sessions are dropped.
pub struct GroupSessionIterator<'a> {
    storage: &'a dyn PersistentStorage,
    crypto: Arc<dyn CryptoProvider>,
    session_id: u16,
    list: FabricList,
    cursor: SessionCursor<'a>,
    slot: Arc<PoolSlot>,
}

impl GroupSessionIterator<'_> {
    /// Number of matching sessions, independent of iteration progress
    pub fn total(&self) -> usize {
        let mut cursor = SessionCursor::new(self.storage, &self.list);
        std::iter::from_fn(|| cursor.next_match(self.session_id)).count()
    }

    pub fn release(self) {}
}

impl Iterator for GroupSessionIterator<'_> {
    type Item = GroupSession;

    fn next(&mut self) -> Option<GroupSession> {
        loop {
            let found = self.cursor.next_match(self.session_id)?;
            let credentials = &found.keyset.operational_keys[found.slot];
            match GroupKeyContext::new(credentials, Arc::clone(&self.crypto), Some(Arc::clone(&self.slot))) {
                Ok(key_context) => {
                    return Some(GroupSession {
                        fabric_index: found.fabric_index,
                        group_id: found.group_id,
                        security_policy: found.keyset.policy,
                        key_context,
                    })
                }
                Err(e) => warn!(
                    "Failed to build key context for session 0x{:04x}: {}",
                    self.session_id, e
                ),
            }
        }
    }
}
