//! Fabric-scoped group key store
//!
//! Persists groups, group endpoint membership, group to keyset mappings and keysets
//! per fabric on top of a small key-value [`PersistentStorage`], derives the
//! operational credentials of every epoch key through a [`CryptoProvider`], and
//! resolves incoming group session ids to ready-to-use [`GroupKeyContext`]s.

pub mod context;
pub mod crypto;
pub mod error;
pub mod iter;
pub mod provider;
pub mod storage;
pub mod types;

mod pool;
mod records;
mod tlv;

pub use context::GroupKeyContext;
pub use crypto::{AesCryptoProvider, CryptoProvider, GroupOperationalCredentials};
pub use error::{Error, Result};
pub use iter::{EndpointIterator, GroupInfoIterator, GroupKeyIterator, KeySetIterator};
pub use provider::{GroupDataProvider, GroupListener, GroupSessionIterator, Limits};
pub use storage::{FileStorage, MemoryStorage, PersistentStorage};
pub use types::*;
