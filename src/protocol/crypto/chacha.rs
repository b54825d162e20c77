use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce as RawNonce,
};

use super::{lengths, CryptoError};

/// 96-bit nonce for ChaCha20-Poly1305
///
/// HAP uses two nonce shapes: four zero bytes followed by a 64-bit
/// little-endian sequence counter (record layer), and four zero bytes
/// followed by an eight-character message label (pairing sub-TLVs).
#[derive(Clone, Copy)]
pub struct Nonce([u8; lengths::CHACHA_NONCE]);

impl Nonce {
    /// Nonce from a record-layer sequence counter
    #[must_use]
    pub fn from_counter(counter: u64) -> Self {
        let mut nonce = [0u8; lengths::CHACHA_NONCE];
        nonce[4..].copy_from_slice(&counter.to_le_bytes());
        Self(nonce)
    }

    /// Nonce from a pairing message label such as `PS-Msg05`
    #[must_use]
    pub fn from_label(label: &[u8; 8]) -> Self {
        let mut nonce = [0u8; lengths::CHACHA_NONCE];
        nonce[4..].copy_from_slice(label);
        Self(nonce)
    }

    /// Raw nonce bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; lengths::CHACHA_NONCE] {
        &self.0
    }
}

/// ChaCha20-Poly1305 AEAD keyed with a 32-byte session key
pub struct AeadCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadCipher").finish_non_exhaustive()
    }
}

impl AeadCipher {
    /// Create a cipher from a 32-byte key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] for any other key length.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher =
            ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidLength {
                expected: lengths::CHACHA_KEY,
                actual: key.len(),
            })?;
        Ok(Self { cipher })
    }

    /// Encrypt and authenticate; returns ciphertext with the 16-byte tag
    /// appended. `aad` may be empty.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] on cipher failure.
    pub fn seal(&self, nonce: &Nonce, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(
                RawNonce::from_slice(&nonce.0),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Verify the tag and decrypt; `ciphertext` carries the 16-byte tag
    /// appended. `aad` must match what was sealed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] on tag mismatch or
    /// malformed input.
    pub fn open(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(
                RawNonce::from_slice(&nonce.0),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
