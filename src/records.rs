//! Persisted records and the singly linked lists built from them
//!
//! Each entity is stored as its own record. Lists are formed by `next` ids and a
//! head id plus count held by the owning record (the fabric summary for groups, key
//! maps and keysets; the group for endpoints; the fabric directory for fabrics).
//! Walks are always bounded by the owner's count, never by a sentinel.

use std::fmt;

use tracing::warn;

use crate::crypto::GroupOperationalCredentials;
use crate::error::{Error, Result};
use crate::storage::{keys, PersistentStorage};
use crate::tlv::{TlvReader, TlvWriter};
use crate::types::{
    EndpointId, FabricIndex, GroupId, KeysetId, SecurityPolicy, EPOCH_KEYS_MAX,
    INVALID_ENDPOINT_ID, INVALID_KEYSET_ID, UNDEFINED_FABRIC_INDEX, UNDEFINED_GROUP_ID,
};

pub(crate) trait Record {
    fn key(&self) -> String;
    fn encode(&self, w: &mut TlvWriter);
    fn decode(&mut self, r: &TlvReader) -> Result<()>;

    fn load(&mut self, storage: &dyn PersistentStorage) -> Result<()> {
        let data = storage.get(&self.key())?;
        let reader = TlvReader::parse_record(&data)?;
        self.decode(&reader)
    }

    fn save(&self, storage: &mut dyn PersistentStorage) -> Result<()> {
        let mut w = TlvWriter::record();
        self.encode(&mut w);
        storage.set(&self.key(), &w.finish())
    }

    fn delete(&self, storage: &mut dyn PersistentStorage) -> Result<()> {
        storage.delete(&self.key())
    }
}

/// A record that is a node of a singly linked list
pub(crate) trait Linked: Record + Sized {
    /// Everything besides the id that the storage key is built from
    type Scope: Copy;
    type Id: Copy + PartialEq + fmt::Debug;

    fn at(scope: Self::Scope, id: Self::Id) -> Self;
    fn id(&self) -> Self::Id;
    fn next(&self) -> Self::Id;
    fn set_next(&mut self, next: Self::Id);
}

/// A record found by walking its list, with its position
#[derive(Debug)]
pub(crate) struct Located<T: Linked> {
    pub record: T,
    pub index: usize,
    /// Id of the predecessor, `None` for the head
    pub prev: Option<T::Id>,
}

impl<T: Linked> Located<T> {
    pub fn is_first(&self) -> bool {
        self.prev.is_none()
    }
}

/// Walks `count` nodes starting at `head`.
///
/// A node that fails to load ends the walk early: the owner's count claims an entry
/// the storage cannot produce, which callers observe as "not found".
pub(crate) struct ListWalk<'a, T: Linked> {
    storage: &'a dyn PersistentStorage,
    scope: T::Scope,
    next: T::Id,
    index: usize,
    count: usize,
    prev: Option<T::Id>,
}

impl<'a, T: Linked> ListWalk<'a, T> {
    pub fn new(storage: &'a dyn PersistentStorage, scope: T::Scope, head: T::Id, count: usize) -> Self {
        Self {
            storage,
            scope,
            next: head,
            index: 0,
            count,
            prev: None,
        }
    }
}

impl<T: Linked> Iterator for ListWalk<'_, T> {
    type Item = Located<T>;

    fn next(&mut self) -> Option<Located<T>> {
        if self.index >= self.count {
            return None;
        }
        let mut record = T::at(self.scope, self.next);
        if let Err(e) = record.load(self.storage) {
            warn!(
                "List walk stopped at index {} of {} ({:?}): {}",
                self.index, self.count, self.next, e
            );
            self.index = self.count;
            return None;
        }
        let id = record.id();
        let next = record.next();
        let located = Located {
            record,
            index: self.index,
            prev: self.prev,
        };
        self.prev = Some(id);
        self.next = next;
        self.index += 1;
        Some(located)
    }
}

/// Point the predecessor of a node (or the owner's head when it has none) at `next`
pub(crate) fn relink<T: Linked>(
    storage: &mut dyn PersistentStorage,
    scope: T::Scope,
    prev: Option<T::Id>,
    head: &mut T::Id,
    next: T::Id,
) -> Result<()> {
    match prev {
        None => {
            *head = next;
            Ok(())
        }
        Some(prev_id) => {
            let mut predecessor = T::at(scope, prev_id);
            predecessor.load(&*storage)?;
            predecessor.set_next(next);
            predecessor.save(storage)
        }
    }
}

// ---------------------------------------------------------------------------
// Fabric directory
// ---------------------------------------------------------------------------

/// Head of the list of fabrics that own at least one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FabricList {
    pub first_entry: FabricIndex,
    pub entry_count: u16,
}

impl FabricList {
    const TAG_FIRST_ENTRY: u8 = 1;
    const TAG_ENTRY_COUNT: u8 = 2;

    /// Absent directory means no fabric has been registered yet
    pub fn load_or_empty(storage: &dyn PersistentStorage) -> Result<Self> {
        let mut list = FabricList::default();
        match list.load(storage) {
            Ok(()) => Ok(list),
            Err(e) if e.is_not_found() => Ok(FabricList::default()),
            Err(e) => Err(e),
        }
    }

    pub fn fabrics<'a>(&self, storage: &'a dyn PersistentStorage) -> ListWalk<'a, FabricData> {
        ListWalk::new(storage, (), self.first_entry, self.entry_count as usize)
    }
}

impl Record for FabricList {
    fn key(&self) -> String {
        keys::fabric_list()
    }

    fn encode(&self, w: &mut TlvWriter) {
        w.put_uint(Self::TAG_FIRST_ENTRY, self.first_entry as u64);
        w.put_uint(Self::TAG_ENTRY_COUNT, self.entry_count as u64);
    }

    fn decode(&mut self, r: &TlvReader) -> Result<()> {
        self.first_entry = r.u8(Self::TAG_FIRST_ENTRY)?;
        self.entry_count = r.u16(Self::TAG_ENTRY_COUNT)?;
        Ok(())
    }
}

/// Per-fabric summary: counts and heads of the group, key map and keyset lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FabricData {
    pub fabric_index: FabricIndex,
    pub first_group: GroupId,
    pub group_count: u16,
    pub first_map: u16,
    pub map_count: u16,
    pub first_keyset: KeysetId,
    pub keyset_count: u16,
    pub next: FabricIndex,
    /// Largest key map link id ever allocated in this fabric
    pub last_map_id: u16,
}

impl FabricData {
    const TAG_FIRST_GROUP: u8 = 1;
    const TAG_GROUP_COUNT: u8 = 2;
    const TAG_FIRST_MAP: u8 = 3;
    const TAG_MAP_COUNT: u8 = 4;
    const TAG_FIRST_KEYSET: u8 = 5;
    const TAG_KEYSET_COUNT: u8 = 6;
    const TAG_NEXT: u8 = 7;
    const TAG_LAST_MAP_ID: u8 = 8;

    pub fn new(fabric_index: FabricIndex) -> Self {
        Self {
            fabric_index,
            first_group: UNDEFINED_GROUP_ID,
            group_count: 0,
            first_map: 0,
            map_count: 0,
            first_keyset: INVALID_KEYSET_ID,
            keyset_count: 0,
            next: UNDEFINED_FABRIC_INDEX,
            last_map_id: 0,
        }
    }

    /// A fabric without a summary record has no groups, maps or keysets
    pub fn load_or_empty(storage: &dyn PersistentStorage, fabric_index: FabricIndex) -> Result<Self> {
        let mut fabric = FabricData::new(fabric_index);
        match fabric.load(storage) {
            Ok(()) => Ok(fabric),
            Err(e) if e.is_not_found() => Ok(FabricData::new(fabric_index)),
            Err(e) => Err(e),
        }
    }

    pub fn groups<'a>(&self, storage: &'a dyn PersistentStorage) -> ListWalk<'a, GroupData> {
        ListWalk::new(storage, self.fabric_index, self.first_group, self.group_count as usize)
    }

    pub fn maps<'a>(&self, storage: &'a dyn PersistentStorage) -> ListWalk<'a, KeyMapData> {
        ListWalk::new(storage, self.fabric_index, self.first_map, self.map_count as usize)
    }

    pub fn keysets<'a>(&self, storage: &'a dyn PersistentStorage) -> ListWalk<'a, KeySetData> {
        ListWalk::new(storage, self.fabric_index, self.first_keyset, self.keyset_count as usize)
    }
}

impl Record for FabricData {
    fn key(&self) -> String {
        keys::fabric_groups(self.fabric_index)
    }

    fn encode(&self, w: &mut TlvWriter) {
        w.put_uint(Self::TAG_FIRST_GROUP, self.first_group as u64);
        w.put_uint(Self::TAG_GROUP_COUNT, self.group_count as u64);
        w.put_uint(Self::TAG_FIRST_MAP, self.first_map as u64);
        w.put_uint(Self::TAG_MAP_COUNT, self.map_count as u64);
        w.put_uint(Self::TAG_FIRST_KEYSET, self.first_keyset as u64);
        w.put_uint(Self::TAG_KEYSET_COUNT, self.keyset_count as u64);
        w.put_uint(Self::TAG_NEXT, self.next as u64);
        w.put_uint(Self::TAG_LAST_MAP_ID, self.last_map_id as u64);
    }

    fn decode(&mut self, r: &TlvReader) -> Result<()> {
        self.first_group = r.u16(Self::TAG_FIRST_GROUP)?;
        self.group_count = r.u16(Self::TAG_GROUP_COUNT)?;
        self.first_map = r.u16(Self::TAG_FIRST_MAP)?;
        self.map_count = r.u16(Self::TAG_MAP_COUNT)?;
        self.first_keyset = r.u16(Self::TAG_FIRST_KEYSET)?;
        self.keyset_count = r.u16(Self::TAG_KEYSET_COUNT)?;
        self.next = r.u8(Self::TAG_NEXT)?;
        self.last_map_id = if r.has(Self::TAG_LAST_MAP_ID) {
            r.u16(Self::TAG_LAST_MAP_ID)?
        } else {
            0
        };
        Ok(())
    }
}

impl Linked for FabricData {
    type Scope = ();
    type Id = FabricIndex;

    fn at(_: (), id: FabricIndex) -> Self {
        FabricData::new(id)
    }

    fn id(&self) -> FabricIndex {
        self.fabric_index
    }

    fn next(&self) -> FabricIndex {
        self.next
    }

    fn set_next(&mut self, next: FabricIndex) {
        self.next = next;
    }
}

// ---------------------------------------------------------------------------
// Groups and endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroupData {
    pub fabric_index: FabricIndex,
    pub group_id: GroupId,
    pub name: String,
    pub first_endpoint: EndpointId,
    pub endpoint_count: u16,
    pub next: GroupId,
}

impl GroupData {
    const TAG_NAME: u8 = 1;
    const TAG_FIRST_ENDPOINT: u8 = 2;
    const TAG_ENDPOINT_COUNT: u8 = 3;
    const TAG_NEXT: u8 = 4;

    pub fn new(fabric_index: FabricIndex, group_id: GroupId) -> Self {
        Self {
            fabric_index,
            group_id,
            name: String::new(),
            first_endpoint: INVALID_ENDPOINT_ID,
            endpoint_count: 0,
            next: UNDEFINED_GROUP_ID,
        }
    }

    pub fn endpoints<'a>(&self, storage: &'a dyn PersistentStorage) -> ListWalk<'a, EndpointData> {
        ListWalk::new(
            storage,
            (self.fabric_index, self.group_id),
            self.first_endpoint,
            self.endpoint_count as usize,
        )
    }
}

impl Record for GroupData {
    fn key(&self) -> String {
        keys::fabric_group(self.fabric_index, self.group_id)
    }

    fn encode(&self, w: &mut TlvWriter) {
        w.put_str(Self::TAG_NAME, &self.name);
        w.put_uint(Self::TAG_FIRST_ENDPOINT, self.first_endpoint as u64);
        w.put_uint(Self::TAG_ENDPOINT_COUNT, self.endpoint_count as u64);
        w.put_uint(Self::TAG_NEXT, self.next as u64);
    }

    fn decode(&mut self, r: &TlvReader) -> Result<()> {
        self.name = r.str(Self::TAG_NAME)?.to_string();
        self.first_endpoint = r.u16(Self::TAG_FIRST_ENDPOINT)?;
        self.endpoint_count = r.u16(Self::TAG_ENDPOINT_COUNT)?;
        self.next = r.u16(Self::TAG_NEXT)?;
        Ok(())
    }
}

impl Linked for GroupData {
    type Scope = FabricIndex;
    type Id = GroupId;

    fn at(fabric_index: FabricIndex, id: GroupId) -> Self {
        GroupData::new(fabric_index, id)
    }

    fn id(&self) -> GroupId {
        self.group_id
    }

    fn next(&self) -> GroupId {
        self.next
    }

    fn set_next(&mut self, next: GroupId) {
        self.next = next;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EndpointData {
    pub fabric_index: FabricIndex,
    pub group_id: GroupId,
    pub endpoint_id: EndpointId,
    pub next: EndpointId,
}

impl EndpointData {
    const TAG_NEXT: u8 = 1;

    pub fn new(fabric_index: FabricIndex, group_id: GroupId, endpoint_id: EndpointId) -> Self {
        Self {
            fabric_index,
            group_id,
            endpoint_id,
            next: INVALID_ENDPOINT_ID,
        }
    }
}

impl Record for EndpointData {
    fn key(&self) -> String {
        keys::fabric_group_endpoint(self.fabric_index, self.group_id, self.endpoint_id)
    }

    fn encode(&self, w: &mut TlvWriter) {
        w.put_uint(Self::TAG_NEXT, self.next as u64);
    }

    fn decode(&mut self, r: &TlvReader) -> Result<()> {
        self.next = r.u16(Self::TAG_NEXT)?;
        Ok(())
    }
}

impl Linked for EndpointData {
    type Scope = (FabricIndex, GroupId);
    type Id = EndpointId;

    fn at((fabric_index, group_id): (FabricIndex, GroupId), id: EndpointId) -> Self {
        EndpointData::new(fabric_index, group_id, id)
    }

    fn id(&self) -> EndpointId {
        self.endpoint_id
    }

    fn next(&self) -> EndpointId {
        self.next
    }

    fn set_next(&mut self, next: EndpointId) {
        self.next = next;
    }
}

// ---------------------------------------------------------------------------
// Group key map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeyMapData {
    pub fabric_index: FabricIndex,
    /// Link id, allocated per fabric
    pub id: u16,
    pub group_id: GroupId,
    pub keyset_id: KeysetId,
    pub next: u16,
}

impl KeyMapData {
    const TAG_GROUP_ID: u8 = 1;
    const TAG_KEYSET_ID: u8 = 2;
    const TAG_NEXT: u8 = 3;

    pub fn new(fabric_index: FabricIndex, id: u16) -> Self {
        Self {
            fabric_index,
            id,
            group_id: UNDEFINED_GROUP_ID,
            keyset_id: 0,
            next: 0,
        }
    }
}

impl Record for KeyMapData {
    fn key(&self) -> String {
        keys::fabric_group_key(self.fabric_index, self.id)
    }

    fn encode(&self, w: &mut TlvWriter) {
        w.put_uint(Self::TAG_GROUP_ID, self.group_id as u64);
        w.put_uint(Self::TAG_KEYSET_ID, self.keyset_id as u64);
        w.put_uint(Self::TAG_NEXT, self.next as u64);
    }

    fn decode(&mut self, r: &TlvReader) -> Result<()> {
        self.group_id = r.u16(Self::TAG_GROUP_ID)?;
        self.keyset_id = r.u16(Self::TAG_KEYSET_ID)?;
        self.next = r.u16(Self::TAG_NEXT)?;
        Ok(())
    }
}

impl Linked for KeyMapData {
    type Scope = FabricIndex;
    type Id = u16;

    fn at(fabric_index: FabricIndex, id: u16) -> Self {
        KeyMapData::new(fabric_index, id)
    }

    fn id(&self) -> u16 {
        self.id
    }

    fn next(&self) -> u16 {
        self.next
    }

    fn set_next(&mut self, next: u16) {
        self.next = next;
    }
}

// ---------------------------------------------------------------------------
// Keysets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeySetData {
    pub fabric_index: FabricIndex,
    pub keyset_id: KeysetId,
    pub policy: SecurityPolicy,
    pub keys_count: u8,
    /// Derived credentials. `privacy_key` is not persisted and stays zero after a
    /// load; key contexts re-derive it.
    pub operational_keys: [GroupOperationalCredentials; EPOCH_KEYS_MAX],
    pub next: KeysetId,
}

impl KeySetData {
    const TAG_POLICY: u8 = 1;
    const TAG_KEYS_COUNT: u8 = 2;
    const TAG_OPERATIONAL_KEY: u8 = 3;
    const TAG_NEXT: u8 = 4;

    const TAG_START_TIME: u8 = 1;
    const TAG_HASH: u8 = 2;
    const TAG_ENCRYPTION_KEY: u8 = 3;

    pub fn new(fabric_index: FabricIndex, keyset_id: KeysetId) -> Self {
        Self {
            fabric_index,
            keyset_id,
            policy: SecurityPolicy::TrustFirst,
            keys_count: 0,
            operational_keys: Default::default(),
            next: INVALID_KEYSET_ID,
        }
    }

    pub fn used_keys(&self) -> &[GroupOperationalCredentials] {
        &self.operational_keys[..(self.keys_count as usize).min(EPOCH_KEYS_MAX)]
    }

    /// Credentials used for outgoing group traffic.
    ///
    /// Epoch keys are ordered oldest to newest. With three keys the current one is the
    /// second newest, so devices that have not rotated yet still decrypt; with one or
    /// two keys the first slot is current.
    pub fn current_credentials(&self) -> Option<&GroupOperationalCredentials> {
        match self.keys_count {
            1 | 2 => Some(&self.operational_keys[0]),
            3 => Some(&self.operational_keys[1]),
            _ => None,
        }
    }
}

impl Record for KeySetData {
    fn key(&self) -> String {
        keys::fabric_keyset(self.fabric_index, self.keyset_id)
    }

    fn encode(&self, w: &mut TlvWriter) {
        w.put_uint(Self::TAG_POLICY, self.policy as u64);
        w.put_uint(Self::TAG_KEYS_COUNT, self.keys_count as u64);
        for creds in self.used_keys() {
            w.put_struct(Self::TAG_OPERATIONAL_KEY, |s| {
                s.put_uint(Self::TAG_START_TIME, creds.start_time);
                s.put_uint(Self::TAG_HASH, creds.hash as u64);
                s.put_bytes(Self::TAG_ENCRYPTION_KEY, &creds.encryption_key);
            });
        }
        w.put_uint(Self::TAG_NEXT, self.next as u64);
    }

    fn decode(&mut self, r: &TlvReader) -> Result<()> {
        self.policy = SecurityPolicy::try_from(r.u8(Self::TAG_POLICY)?)?;
        self.keys_count = r.u8(Self::TAG_KEYS_COUNT)?;
        if self.keys_count as usize > EPOCH_KEYS_MAX {
            return Err(Error::internal(format!(
                "keyset {} claims {} keys",
                self.keyset_id, self.keys_count
            )));
        }

        let slots = r.structs(Self::TAG_OPERATIONAL_KEY)?;
        if slots.len() < self.keys_count as usize {
            return Err(Error::internal(format!(
                "keyset {} claims {} keys, {} stored",
                self.keyset_id,
                self.keys_count,
                slots.len()
            )));
        }
        self.operational_keys = Default::default();
        for (creds, slot) in self.operational_keys.iter_mut().zip(slots.iter()).take(self.keys_count as usize) {
            creds.start_time = slot.uint(Self::TAG_START_TIME)?;
            creds.hash = slot.u16(Self::TAG_HASH)?;
            creds.encryption_key = slot.array(Self::TAG_ENCRYPTION_KEY)?;
        }
        self.next = r.u16(Self::TAG_NEXT)?;
        Ok(())
    }
}

impl Linked for KeySetData {
    type Scope = FabricIndex;
    type Id = KeysetId;

    fn at(fabric_index: FabricIndex, id: KeysetId) -> Self {
        KeySetData::new(fabric_index, id)
    }

    fn id(&self) -> KeysetId {
        self.keyset_id
    }

    fn next(&self) -> KeysetId {
        self.next
    }

    fn set_next(&mut self, next: KeysetId) {
        self.next = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn round_trip<T: Record + Clone + PartialEq + fmt::Debug>(record: T, blank: T) {
        let mut storage = MemoryStorage::new();
        record.save(&mut storage).unwrap();
        let mut loaded = blank;
        loaded.load(&storage).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_fabric_records_round_trip() {
        round_trip(
            FabricList {
                first_entry: 3,
                entry_count: 2,
            },
            FabricList::default(),
        );
        round_trip(
            FabricData {
                fabric_index: 3,
                first_group: 0x0101,
                group_count: 4,
                first_map: 9,
                map_count: 2,
                first_keyset: 0,
                keyset_count: 1,
                next: 1,
                last_map_id: 12,
            },
            FabricData::new(3),
        );
    }

    #[test]
    fn test_fabric_summary_without_map_id_tag_loads() {
        let mut storage = MemoryStorage::new();
        let mut w = TlvWriter::record();
        for tag in 1..=7 {
            w.put_uint(tag, 0);
        }
        storage.set(&keys::fabric_groups(2), &w.finish()).unwrap();

        let fabric = FabricData::load_or_empty(&storage, 2).unwrap();
        assert_eq!(fabric.last_map_id, 0);
    }

    #[test]
    fn test_group_records_round_trip() {
        let mut group = GroupData::new(1, 7);
        group.name = "Lights".to_string();
        group.first_endpoint = 2;
        group.endpoint_count = 3;
        group.next = 9;
        round_trip(group, GroupData::new(1, 7));

        let mut endpoint = EndpointData::new(1, 7, 2);
        endpoint.next = 5;
        round_trip(endpoint, EndpointData::new(1, 7, 2));
    }

    #[test]
    fn test_key_map_round_trip() {
        let mut map = KeyMapData::new(2, 4);
        map.group_id = 7;
        map.keyset_id = 5;
        map.next = 6;
        round_trip(map, KeyMapData::new(2, 4));
    }

    #[test]
    fn test_keyset_round_trip_drops_privacy_key() {
        let mut keyset = KeySetData::new(1, 5);
        keyset.policy = SecurityPolicy::CacheAndSync;
        keyset.keys_count = 2;
        for (i, creds) in keyset.operational_keys.iter_mut().take(2).enumerate() {
            creds.start_time = 1_000 * (i as u64 + 1);
            creds.hash = 0xAB00 + i as u16;
            creds.encryption_key = [i as u8 + 1; 16];
        }
        keyset.next = 0;
        round_trip(keyset.clone(), KeySetData::new(1, 5));

        let mut storage = MemoryStorage::new();
        keyset.operational_keys[0].privacy_key = [0xEE; 16];
        keyset.save(&mut storage).unwrap();
        let mut loaded = KeySetData::new(1, 5);
        loaded.load(&storage).unwrap();
        assert_eq!(loaded.operational_keys[0].privacy_key, [0u8; 16]);
    }

    #[test]
    fn test_current_credentials_rotation_policy() {
        let mut keyset = KeySetData::new(1, 5);
        for (i, creds) in keyset.operational_keys.iter_mut().enumerate() {
            creds.hash = i as u16;
        }

        keyset.keys_count = 0;
        assert!(keyset.current_credentials().is_none());
        keyset.keys_count = 1;
        assert_eq!(keyset.current_credentials().unwrap().hash, 0);
        keyset.keys_count = 2;
        assert_eq!(keyset.current_credentials().unwrap().hash, 0);
        keyset.keys_count = 3;
        assert_eq!(keyset.current_credentials().unwrap().hash, 1);
    }

    #[test]
    fn test_keyset_with_bad_key_count_is_internal() {
        let mut storage = MemoryStorage::new();
        let mut w = TlvWriter::record();
        w.put_uint(1, 0);
        w.put_uint(2, 4);
        w.put_uint(4, 0);
        storage.set(&keys::fabric_keyset(1, 5), &w.finish()).unwrap();

        let mut keyset = KeySetData::new(1, 5);
        assert!(matches!(keyset.load(&storage), Err(Error::Internal(_))));
    }

    #[test]
    fn test_walk_visits_count_nodes_and_tracks_prev() {
        let mut storage = MemoryStorage::new();
        for (id, next) in [(10u16, 20u16), (20, 30), (30, 0)] {
            let mut group = GroupData::new(1, id);
            group.next = next;
            group.save(&mut storage).unwrap();
        }

        let walked: Vec<_> = ListWalk::<GroupData>::new(&storage, 1, 10, 3)
            .map(|l| (l.record.group_id, l.index, l.prev))
            .collect();
        assert_eq!(walked, vec![(10, 0, None), (20, 1, Some(10)), (30, 2, Some(20))]);

        // Count bounds the walk, not the sentinel
        assert_eq!(ListWalk::<GroupData>::new(&storage, 1, 10, 2).count(), 2);
    }

    #[test]
    fn test_walk_stops_on_missing_node() {
        let mut storage = MemoryStorage::new();
        let mut group = GroupData::new(1, 10);
        group.next = 99;
        group.save(&mut storage).unwrap();

        assert_eq!(ListWalk::<GroupData>::new(&storage, 1, 10, 3).count(), 1);
    }

    #[test]
    fn test_relink_head_and_middle() {
        let mut storage = MemoryStorage::new();
        let mut first = GroupData::new(1, 10);
        first.next = 20;
        first.save(&mut storage).unwrap();

        let mut head = 10;
        relink::<GroupData>(&mut storage, 1, None, &mut head, 20).unwrap();
        assert_eq!(head, 20);

        relink::<GroupData>(&mut storage, 1, Some(10), &mut head, 30).unwrap();
        let mut reloaded = GroupData::new(1, 10);
        reloaded.load(&storage).unwrap();
        assert_eq!(reloaded.next, 30);
    }
}
