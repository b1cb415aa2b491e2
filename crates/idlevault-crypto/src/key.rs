use sha2::Sha256;
use zeroize::Zeroizing;

use idlevault_types::error::{IdlevaultError, Result};

/// PBKDF2 iteration count used for every artifact.
pub const DEFAULT_ITERATIONS: u32 = 200_000;

/// Derive a 32-byte AES key from `password` and `salt` with PBKDF2-HMAC-SHA256.
///
/// Deterministic for identical inputs. The key is zeroized on drop.
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> Result<Zeroizing<[u8; 32]>> {
    if iterations == 0 {
        return Err(IdlevaultError::KeyDerivation(
            "iteration count must be at least 1".into(),
        ));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, key.as_mut());
    Ok(key)
}
