use hkdf::Hkdf;
use sha2::Sha512;

use super::CryptoError;

/// One-shot HKDF-SHA512 producing a 32-byte key
///
/// Every HAP derivation uses a 32-byte output; salts and info strings are
/// the protocol constants of the pairing and session-security chapters.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivationFailed`] when HKDF expansion fails.
pub fn derive_key(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut okm = [0u8; 32];
    Hkdf::<Sha512>::new(Some(salt), ikm)
        .expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(okm)
}
