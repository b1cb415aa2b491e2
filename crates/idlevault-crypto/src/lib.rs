pub mod aes_gcm;
pub mod key;

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;

use idlevault_types::error::{IdlevaultError, Result};

use crate::aes_gcm::Aes256GcmEngine;
pub use crate::key::{derive_key, DEFAULT_ITERATIONS};

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Smallest well-formed blob: salt, nonce and the tag of an empty message.
pub const MIN_BLOB_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

/// Password-based artifact encryption.
///
/// Blob layout: `[16-byte salt][12-byte nonce][ciphertext + 16-byte tag]`.
/// Every call draws a fresh salt and nonce from the OS CSPRNG, so the same
/// plaintext and password never produce the same bytes twice.
#[derive(Debug, Clone, Copy)]
pub struct Encryptor {
    iterations: u32,
}

impl Default for Encryptor {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl Encryptor {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn encrypt(&self, plaintext: &[u8], password: &[u8]) -> Result<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let key = derive_key(password, &salt, self.iterations)?;
        let ciphertext = Aes256GcmEngine::new(&key).seal(&nonce, plaintext)?;

        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a blob produced by [`Encryptor::encrypt`].
    ///
    /// A wrong password, a truncated blob, or any modified byte yields
    /// [`IdlevaultError::DecryptionFailed`]; no plaintext is ever returned
    /// unless the tag verifies.
    pub fn decrypt(&self, blob: &[u8], password: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < MIN_BLOB_LEN {
            return Err(IdlevaultError::DecryptionFailed);
        }
        let (salt, rest) = blob.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let key = derive_key(password, salt, self.iterations)?;
        Aes256GcmEngine::new(&key).open(nonce, ciphertext)
    }

    /// Encrypt the file at `input` into `output`.
    ///
    /// The blob is written to `<output>.partial` and renamed into place, so
    /// `output` either holds a complete blob or does not exist.
    pub fn encrypt_file(&self, input: &Path, output: &Path, password: &[u8]) -> Result<u64> {
        let plaintext = fs::read(input)?;
        let blob = self.encrypt(&plaintext, password)?;
        write_atomically(output, &blob)?;
        Ok(blob.len() as u64)
    }

    pub fn decrypt_file(&self, input: &Path, output: &Path, password: &[u8]) -> Result<()> {
        let blob = fs::read(input)?;
        let plaintext = self.decrypt(&blob, password)?;
        write_atomically(output, &plaintext)
    }
}

/// Path used while a blob is still being written.
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name: OsString = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn write_atomically(output: &Path, data: &[u8]) -> Result<()> {
    let tmp = partial_path(output);
    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, output)
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
