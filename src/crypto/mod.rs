//! Group key derivation and symmetric crypto capability
//!
//! The store never persists epoch keys. For every epoch key it derives a set of
//! operational credentials bound to the fabric:
//! - encryption key for group message AEAD
//! - privacy key for the privacy (obfuscation) pass over message headers
//! - a 16-bit hash used as the group session id on the wire
//!
//! Only the encryption key, hash and start time are persisted; the privacy key is
//! re-derived from the encryption key when a keyset is loaded.

mod aes_provider;

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Result;
use crate::types::CompressedFabricId;

pub use aes_provider::AesCryptoProvider;

pub const SYMMETRIC_KEY_LENGTH: usize = 16;
pub const AEAD_NONCE_LENGTH: usize = 12;
pub const AEAD_MIC_LENGTH: usize = 16;
pub const PRIVACY_NONCE_LENGTH: usize = 13;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_LENGTH];
pub type Mic = [u8; AEAD_MIC_LENGTH];

/// Credentials derived from one epoch key
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct GroupOperationalCredentials {
    /// Activation time of the epoch key this was derived from
    pub start_time: u64,
    /// Group session id
    pub hash: u16,
    pub encryption_key: SymmetricKey,
    pub privacy_key: SymmetricKey,
}

impl fmt::Debug for GroupOperationalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupOperationalCredentials")
            .field("start_time", &self.start_time)
            .field("hash", &format_args!("0x{:04x}", self.hash))
            .field("encryption_key", &"<redacted>")
            .field("privacy_key", &"<redacted>")
            .finish()
    }
}

/// Crypto primitives consumed by the store and its key contexts
pub trait CryptoProvider: Send + Sync {
    /// Derive encryption key, privacy key and session hash from an epoch key.
    /// The returned `start_time` is zero; callers fill it in.
    fn derive_group_operational_credentials(
        &self,
        epoch_key: &SymmetricKey,
        compressed_fabric_id: CompressedFabricId,
    ) -> Result<GroupOperationalCredentials>;

    fn derive_group_privacy_key(&self, encryption_key: &SymmetricKey) -> Result<SymmetricKey>;

    /// Authenticated encryption with a detached MIC
    fn aead_encrypt(
        &self,
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Mic)>;

    fn aead_decrypt(
        &self,
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        mic: &Mic,
    ) -> Result<Vec<u8>>;

    /// Stream cipher used for the privacy pass; applying it twice is the identity
    fn privacy_cipher(&self, key: &SymmetricKey, nonce: &[u8], input: &[u8]) -> Result<Vec<u8>>;
}
