use thiserror::Error;

/// Errors from the cryptographic primitives façade
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// A key, nonce, or signature had the wrong length
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        actual: usize,
    },

    /// A public key failed validation
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature verification failed
    #[error("invalid signature")]
    InvalidSignature,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption or tag verification failed
    #[error("decryption failed")]
    DecryptionFailed,

    /// HKDF expansion failed
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// SRP protocol failure
    #[error("SRP error: {0}")]
    Srp(&'static str),
}
