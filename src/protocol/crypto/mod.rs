//! Cryptographic primitives for HAP pairing and session security

mod chacha;
mod ed25519;
mod error;
mod hkdf;
mod srp;
mod x25519;

pub use self::chacha::{AeadCipher, Nonce};
pub use self::ed25519::{verify_signature, LongTermKeys};
pub use self::error::CryptoError;
pub use self::hkdf::derive_key;
pub use self::srp::{compute_verifier, SrpParams, SrpServer, PROOF_LEN, PUBLIC_KEY_LEN, SALT_LEN};
pub use self::x25519::{EphemeralKeys, SharedSecret};

#[cfg(test)]
pub(crate) use self::srp::test_client;

/// Lengths of the cryptographic values on the wire
pub mod lengths {
    /// Ed25519 public key
    pub const ED25519_PUBLIC_KEY: usize = 32;
    /// Ed25519 signature
    pub const ED25519_SIGNATURE: usize = 64;
    /// Curve25519 public key
    pub const X25519_PUBLIC_KEY: usize = 32;
    /// Curve25519 shared secret
    pub const X25519_SHARED_SECRET: usize = 32;
    /// ChaCha20-Poly1305 key
    pub const CHACHA_KEY: usize = 32;
    /// ChaCha20-Poly1305 nonce
    pub const CHACHA_NONCE: usize = 12;
    /// Poly1305 tag
    pub const CHACHA_TAG: usize = 16;
}
