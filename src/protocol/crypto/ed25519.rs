use ed25519_dalek::{Signer, Verifier};

use super::{lengths, CryptoError};

/// Accessory long-term Ed25519 identity (LTSK/LTPK)
///
/// One keypair per accessory, persisted across restarts and regenerated
/// only on factory reset.
pub struct LongTermKeys {
    signing_key: ed25519_dalek::SigningKey,
}

impl LongTermKeys {
    /// Generate a fresh identity
    #[must_use]
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore an identity from the 32-byte secret key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] for any other length.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        })
    }

    /// The accessory LTPK
    #[must_use]
    pub fn public_bytes(&self) -> [u8; lengths::ED25519_PUBLIC_KEY] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The accessory LTSK, for the persistence snapshot
    #[must_use]
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message with the LTSK
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; lengths::ED25519_SIGNATURE] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verify an Ed25519 signature against a raw 32-byte public key
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPublicKey`] for a malformed key,
/// [`CryptoError::InvalidLength`] for a wrong-sized signature, and
/// [`CryptoError::InvalidSignature`] when verification fails.
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| CryptoError::InvalidPublicKey)?;

    if signature.len() != lengths::ED25519_SIGNATURE {
        return Err(CryptoError::InvalidLength {
            expected: lengths::ED25519_SIGNATURE,
            actual: signature.len(),
        });
    }
    let signature = ed25519_dalek::Signature::from_slice(signature)
        .map_err(|_| CryptoError::InvalidSignature)?;

    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}
