//! Public identifiers and value types exchanged with the store

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::context::GroupKeyContext;
use crate::crypto::SYMMETRIC_KEY_LENGTH;
use crate::error::{Error, Result};

pub type FabricIndex = u8;
pub type GroupId = u16;
pub type EndpointId = u16;
pub type KeysetId = u16;
pub type CompressedFabricId = u64;

/// Fabric index that never names a real fabric.
pub const UNDEFINED_FABRIC_INDEX: FabricIndex = 0;
pub const UNDEFINED_GROUP_ID: GroupId = 0;
pub const INVALID_ENDPOINT_ID: EndpointId = 0xFFFF;
pub const INVALID_KEYSET_ID: KeysetId = 0xFFFF;

/// Keyset id reserved for the Identity Protection Key (IPK).
pub const IPK_KEYSET_ID: KeysetId = 0;

/// Maximum group name length in bytes.
pub const GROUP_NAME_MAX_LENGTH: usize = 16;

/// Number of epoch key slots in a keyset (previous, current, next).
pub const EPOCH_KEYS_MAX: usize = 3;

/// A named group within a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: GroupId,
    pub name: String,
}

impl GroupInfo {
    /// Build a group, truncating the name to [`GROUP_NAME_MAX_LENGTH`] bytes on a
    /// character boundary.
    pub fn new(group_id: GroupId, name: &str) -> Self {
        Self {
            group_id,
            name: truncate_name(name).to_string(),
        }
    }
}

pub(crate) fn truncate_name(name: &str) -> &str {
    if name.len() <= GROUP_NAME_MAX_LENGTH {
        return name;
    }
    let mut end = GROUP_NAME_MAX_LENGTH;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Membership of an endpoint in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEndpoint {
    pub group_id: GroupId,
    pub endpoint_id: EndpointId,
}

/// Association between a group and the keyset protecting its traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKey {
    pub group_id: GroupId,
    pub keyset_id: KeysetId,
}

impl GroupKey {
    pub fn new(group_id: GroupId, keyset_id: KeysetId) -> Self {
        Self {
            group_id,
            keyset_id,
        }
    }
}

/// Group key security policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum SecurityPolicy {
    #[default]
    TrustFirst = 0,
    CacheAndSync = 1,
}

impl TryFrom<u8> for SecurityPolicy {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SecurityPolicy::TrustFirst),
            1 => Ok(SecurityPolicy::CacheAndSync),
            _ => Err(Error::internal(format!("unknown security policy {}", value))),
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityPolicy::TrustFirst => write!(f, "TrustFirst"),
            SecurityPolicy::CacheAndSync => write!(f, "CacheAndSync"),
        }
    }
}

/// An epoch key and the time (microseconds since epoch) it becomes active.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EpochKey {
    pub start_time: u64,
    pub key: [u8; SYMMETRIC_KEY_LENGTH],
}

impl EpochKey {
    pub fn new(start_time: u64, key: [u8; SYMMETRIC_KEY_LENGTH]) -> Self {
        Self { start_time, key }
    }
}

impl fmt::Debug for EpochKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochKey")
            .field("start_time", &self.start_time)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// A keyset as supplied by and returned to callers.
///
/// On input the epoch keys carry raw key material. On output from
/// [`get_keyset`](crate::GroupDataProvider::get_keyset) only the start times are
/// populated; [`get_ipk_keyset`](crate::GroupDataProvider::get_ipk_keyset) additionally
/// fills the key bytes with the derived encryption keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    pub keyset_id: KeysetId,
    pub policy: SecurityPolicy,
    pub num_keys_used: u8,
    pub epoch_keys: [EpochKey; EPOCH_KEYS_MAX],
}

impl KeySet {
    pub fn new(keyset_id: KeysetId, policy: SecurityPolicy, epoch_keys: &[EpochKey]) -> Result<Self> {
        if epoch_keys.len() > EPOCH_KEYS_MAX {
            return Err(Error::InvalidArgument(format!(
                "a keyset holds at most {} epoch keys, got {}",
                EPOCH_KEYS_MAX,
                epoch_keys.len()
            )));
        }
        let mut keyset = Self {
            keyset_id,
            policy,
            num_keys_used: epoch_keys.len() as u8,
            epoch_keys: Default::default(),
        };
        for (slot, key) in keyset.epoch_keys.iter_mut().zip(epoch_keys) {
            *slot = key.clone();
        }
        Ok(keyset)
    }
}

/// A group session resolved from an incoming session id.
#[derive(Debug)]
pub struct GroupSession {
    pub fabric_index: FabricIndex,
    pub group_id: GroupId,
    pub security_policy: SecurityPolicy,
    pub key_context: GroupKeyContext,
}
