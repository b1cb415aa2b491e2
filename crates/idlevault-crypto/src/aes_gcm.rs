use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use idlevault_types::error::{IdlevaultError, Result};

use crate::{NONCE_LEN, TAG_LEN};

/// AES-256-GCM engine bound to one derived key. No associated data.
pub struct Aes256GcmEngine {
    cipher: Aes256Gcm,
}

impl Aes256GcmEngine {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt `plaintext`, returning ciphertext with the 16-byte tag appended.
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| IdlevaultError::Encryption(format!("AES-GCM encrypt: {e}")))
    }

    /// Authenticate and decrypt `ciphertext` (tag included).
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
            return Err(IdlevaultError::DecryptionFailed);
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| IdlevaultError::DecryptionFailed)
    }
}
