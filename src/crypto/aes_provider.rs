//! Default crypto provider: HKDF-SHA256 derivation, AES-128-GCM message AEAD and
//! AES-128-CTR privacy pass.
//!
//! Derivation (compressed fabric id as big-endian salt):
//!   OperationalKey = HKDF(EpochKey, salt=CompressedFabricId, info="GroupKey v1.0", 16)
//!   GroupKeyHash   = HKDF(OperationalKey, salt=[], info="GroupKeyHash", 2)  (BE u16)
//!   PrivacyKey     = HKDF(OperationalKey, salt=[], info="PrivacyKey", 16)
//!
//! Privacy counter block (CCM style, L=2):
//!   Flags(1)=0x01 | Nonce(13) | Counter(2,BE)

use aes::cipher::{BlockEncrypt, KeyInit as BlockKeyInit};
use aes::Aes128;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes128Gcm;
use hkdf::Hkdf;
use sha2::Sha256;

use super::{
    CryptoProvider, GroupOperationalCredentials, Mic, SymmetricKey, AEAD_MIC_LENGTH,
    AEAD_NONCE_LENGTH, PRIVACY_NONCE_LENGTH, SYMMETRIC_KEY_LENGTH,
};
use crate::error::{Error, Result};
use crate::types::CompressedFabricId;

const GROUP_KEY_INFO: &[u8] = b"GroupKey v1.0";
const GROUP_KEY_HASH_INFO: &[u8] = b"GroupKeyHash";
const PRIVACY_KEY_INFO: &[u8] = b"PrivacyKey";

const BLOCK_LEN: usize = 16;
const MAX_PRIVACY_BLOCKS: usize = u16::MAX as usize + 1;

#[derive(Debug, Default, Clone, Copy)]
pub struct AesCryptoProvider;

impl AesCryptoProvider {
    pub fn new() -> Self {
        Self
    }
}

fn hkdf_expand<const N: usize>(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; N]> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; N];
    hkdf.expand(info, &mut okm)
        .map_err(|e| Error::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

fn check_nonce(nonce: &[u8], expected: usize) -> Result<()> {
    if nonce.len() != expected {
        return Err(Error::InvalidArgument(format!(
            "nonce must be {} bytes, got {}",
            expected,
            nonce.len()
        )));
    }
    Ok(())
}

impl CryptoProvider for AesCryptoProvider {
    fn derive_group_operational_credentials(
        &self,
        epoch_key: &SymmetricKey,
        compressed_fabric_id: CompressedFabricId,
    ) -> Result<GroupOperationalCredentials> {
        let salt = compressed_fabric_id.to_be_bytes();
        let encryption_key: SymmetricKey = hkdf_expand(epoch_key, &salt, GROUP_KEY_INFO)?;
        let hash: [u8; 2] = hkdf_expand(&encryption_key, &[], GROUP_KEY_HASH_INFO)?;
        let privacy_key = self.derive_group_privacy_key(&encryption_key)?;

        Ok(GroupOperationalCredentials {
            start_time: 0,
            hash: u16::from_be_bytes(hash),
            encryption_key,
            privacy_key,
        })
    }

    fn derive_group_privacy_key(&self, encryption_key: &SymmetricKey) -> Result<SymmetricKey> {
        hkdf_expand(encryption_key, &[], PRIVACY_KEY_INFO)
    }

    fn aead_encrypt(
        &self,
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Mic)> {
        check_nonce(nonce, AEAD_NONCE_LENGTH)?;
        let cipher = Aes128Gcm::new_from_slice(key)
            .map_err(|e| Error::Crypto(format!("invalid AES-GCM key: {}", e)))?;

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, &mut buffer)
            .map_err(|e| Error::Crypto(format!("AES-GCM encryption failed: {}", e)))?;

        let mut mic = [0u8; AEAD_MIC_LENGTH];
        mic.copy_from_slice(&tag);
        Ok((buffer, mic))
    }

    fn aead_decrypt(
        &self,
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        mic: &Mic,
    ) -> Result<Vec<u8>> {
        check_nonce(nonce, AEAD_NONCE_LENGTH)?;
        let cipher = Aes128Gcm::new_from_slice(key)
            .map_err(|e| Error::Crypto(format!("invalid AES-GCM key: {}", e)))?;

        let mut buffer = ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce),
                aad,
                &mut buffer,
                GenericArray::from_slice(mic),
            )
            .map_err(|e| Error::Crypto(format!("AES-GCM decryption failed: {}", e)))?;
        Ok(buffer)
    }

    fn privacy_cipher(&self, key: &SymmetricKey, nonce: &[u8], input: &[u8]) -> Result<Vec<u8>> {
        check_nonce(nonce, PRIVACY_NONCE_LENGTH)?;
        if input.len().div_ceil(BLOCK_LEN) > MAX_PRIVACY_BLOCKS {
            return Err(Error::InvalidArgument(format!(
                "privacy input of {} bytes exceeds the counter space",
                input.len()
            )));
        }

        let cipher = <Aes128 as BlockKeyInit>::new(GenericArray::from_slice(key));
        let mut counter_block = [0u8; BLOCK_LEN];
        counter_block[0] = 0x01;
        counter_block[1..1 + PRIVACY_NONCE_LENGTH].copy_from_slice(nonce);

        let mut output = Vec::with_capacity(input.len());
        for (counter, chunk) in input.chunks(BLOCK_LEN).enumerate() {
            counter_block[14..].copy_from_slice(&(counter as u16).to_be_bytes());
            let mut keystream = GenericArray::clone_from_slice(&counter_block);
            cipher.encrypt_block(&mut keystream);
            output.extend(chunk.iter().zip(keystream.iter()).map(|(b, k)| b ^ k));
        }
        Ok(output)
    }
}
