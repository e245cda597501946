//! Ready-to-use crypto context for one group credential

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::{CryptoProvider, GroupOperationalCredentials, Mic, SymmetricKey};
use crate::error::Result;
use crate::pool::PoolSlot;

/// Encrypts and decrypts group messages with one operational credential.
///
/// Contexts returned by [`get_key_context`](crate::GroupDataProvider::get_key_context)
/// occupy a key-context pool slot until released or dropped. Contexts carried by a
/// [`GroupSession`](crate::GroupSession) share the session iterator's slot, which stays
/// taken until the iterator and every session it yielded are gone.
pub struct GroupKeyContext {
    key_hash: u16,
    encryption_key: Zeroizing<SymmetricKey>,
    privacy_key: Zeroizing<SymmetricKey>,
    crypto: Arc<dyn CryptoProvider>,
    _slot: Option<Arc<PoolSlot>>,
}

impl GroupKeyContext {
    /// Build a context from stored credentials. The privacy key is not persisted and
    /// is re-derived from the encryption key here.
    pub(crate) fn new(
        credentials: &GroupOperationalCredentials,
        crypto: Arc<dyn CryptoProvider>,
        slot: Option<Arc<PoolSlot>>,
    ) -> Result<Self> {
        let privacy_key = Zeroizing::new(crypto.derive_group_privacy_key(&credentials.encryption_key)?);
        Ok(Self {
            key_hash: credentials.hash,
            encryption_key: Zeroizing::new(credentials.encryption_key),
            privacy_key,
            crypto,
            _slot: slot,
        })
    }

    /// Group session id of the credential
    pub fn key_hash(&self) -> u16 {
        self.key_hash
    }

    pub fn encrypt_message(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Mic)> {
        self.crypto
            .aead_encrypt(&self.encryption_key, nonce, aad, plaintext)
    }

    pub fn decrypt_message(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8], mic: &Mic) -> Result<Vec<u8>> {
        self.crypto
            .aead_decrypt(&self.encryption_key, nonce, aad, ciphertext, mic)
    }

    pub fn privacy_encrypt(&self, nonce: &[u8], input: &[u8]) -> Result<Vec<u8>> {
        self.crypto.privacy_cipher(&self.privacy_key, nonce, input)
    }

    pub fn privacy_decrypt(&self, nonce: &[u8], input: &[u8]) -> Result<Vec<u8>> {
        self.crypto.privacy_cipher(&self.privacy_key, nonce, input)
    }

    /// Give the context back to its pool. Dropping it has the same effect.
    pub fn release(self) {}
}

impl fmt::Debug for GroupKeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupKeyContext")
            .field("key_hash", &format_args!("0x{:04x}", self.key_hash))
            .field("pooled", &self._slot.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AesCryptoProvider, AEAD_NONCE_LENGTH, PRIVACY_NONCE_LENGTH};
    use crate::pool::SlotPool;

    fn credentials(crypto: &AesCryptoProvider) -> GroupOperationalCredentials {
        crypto
            .derive_group_operational_credentials(&[0x11; 16], 0xABCD)
            .unwrap()
    }

    #[test]
    fn test_context_round_trips_messages() {
        let crypto = AesCryptoProvider::new();
        let creds = credentials(&crypto);
        let context = GroupKeyContext::new(&creds, Arc::new(crypto), None).unwrap();
        assert_eq!(context.key_hash(), creds.hash);

        let nonce = [0x01; AEAD_NONCE_LENGTH];
        let (ciphertext, mic) = context.encrypt_message(&nonce, b"hdr", b"level 50%").unwrap();
        assert_eq!(
            context.decrypt_message(&nonce, b"hdr", &ciphertext, &mic).unwrap(),
            b"level 50%"
        );

        let privacy_nonce = [0x02; PRIVACY_NONCE_LENGTH];
        let hidden = context.privacy_encrypt(&privacy_nonce, b"header").unwrap();
        assert_eq!(context.privacy_decrypt(&privacy_nonce, &hidden).unwrap(), b"header");
    }

    #[test]
    fn test_privacy_key_rederived_from_stored_credentials() {
        let crypto = AesCryptoProvider::new();
        let creds = credentials(&crypto);
        let mut stored = creds.clone();
        stored.privacy_key = [0; 16];

        let nonce = [0x03; PRIVACY_NONCE_LENGTH];
        let full = GroupKeyContext::new(&creds, Arc::new(crypto), None).unwrap();
        let restored = GroupKeyContext::new(&stored, Arc::new(crypto), None).unwrap();
        assert_eq!(
            full.privacy_encrypt(&nonce, b"abc").unwrap(),
            restored.privacy_encrypt(&nonce, b"abc").unwrap()
        );
    }

    #[test]
    fn test_release_returns_slot() {
        let crypto = AesCryptoProvider::new();
        let pool = SlotPool::new("key context", 1);
        let context = GroupKeyContext::new(&credentials(&crypto), Arc::new(crypto), pool.acquire().map(Arc::new)).unwrap();
        assert_eq!(pool.in_use(), 1);
        context.release();
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_shared_slot_held_by_last_context() {
        let crypto = AesCryptoProvider::new();
        let pool = SlotPool::new("iterator", 1);
        let slot = pool.acquire().map(Arc::new).unwrap();
        let a = GroupKeyContext::new(&credentials(&crypto), Arc::new(crypto), Some(Arc::clone(&slot))).unwrap();
        let b = GroupKeyContext::new(&credentials(&crypto), Arc::new(crypto), Some(Arc::clone(&slot))).unwrap();
        drop(slot);
        a.release();
        assert_eq!(pool.in_use(), 1);
        b.release();
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_debug_hides_keys() {
        let crypto = AesCryptoProvider::new();
        let context = GroupKeyContext::new(&credentials(&crypto), Arc::new(crypto), None).unwrap();
        let printed = format!("{:?}", context);
        assert!(printed.contains("key_hash"));
        assert!(!printed.contains("encryption_key"));
    }
}
