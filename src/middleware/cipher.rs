//! Payload Cipher: AES-256-GCM sealing of message bodies
//!
//! Key = SHA-256(passphrase), passphrase must be at least 16 bytes.
//! Blob layout: nonce (12) | ciphertext | tag (16)

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::CipherError;

pub const MIN_PASSPHRASE_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// 256-bit symmetric key derived from an operator passphrase
#[derive(Clone, PartialEq, Eq)]
pub struct PayloadKey([u8; 32]);

impl PayloadKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

// Key bytes never reach the logs
impl fmt::Debug for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadKey(..)")
    }
}

pub fn derive_key(passphrase: &str) -> Result<PayloadKey, CipherError> {
    if passphrase.len() < MIN_PASSPHRASE_LEN {
        return Err(CipherError::InvalidKeyMaterial);
    }
    let digest = Sha256::digest(passphrase.as_bytes());
    Ok(PayloadKey(digest.into()))
}

pub fn encrypt(key: &PayloadKey, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    // Fresh nonce per call from the OS CSPRNG
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let sealed = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CipherError::EncryptionFailed)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

pub fn decrypt(key: &PayloadKey, blob: &[u8]) -> Result<Vec<u8>, CipherError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherError::AuthenticationFailed);
    }

    let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| CipherError::AuthenticationFailed)
}
