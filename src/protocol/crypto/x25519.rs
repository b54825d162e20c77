use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::{lengths, CryptoError};

/// Ephemeral Curve25519 keypair for one Pair-Verify exchange
pub struct EphemeralKeys {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeys {
    /// Generate a fresh keypair
    #[must_use]
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The accessory's Curve25519 public key
    #[must_use]
    pub fn public_bytes(&self) -> [u8; lengths::X25519_PUBLIC_KEY] {
        self.public.to_bytes()
    }

    /// Diffie-Hellman with the controller's public key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] when the peer key is not
    /// 32 bytes.
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        let bytes: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| CryptoError::InvalidLength {
                expected: lengths::X25519_PUBLIC_KEY,
                actual: peer_public.len(),
            })?;
        let peer = PublicKey::from(bytes);
        Ok(SharedSecret {
            bytes: self.secret.diffie_hellman(&peer).to_bytes(),
        })
    }
}

/// Curve25519 shared secret, wiped on drop
pub struct SharedSecret {
    bytes: [u8; lengths::X25519_SHARED_SECRET],
}

impl SharedSecret {
    /// Raw shared-secret bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; lengths::X25519_SHARED_SECRET] {
        &self.bytes
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}
