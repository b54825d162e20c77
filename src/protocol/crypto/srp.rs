//! SRP-6a server for Pair-Setup
//!
//! HAP mandates the RFC 5054 3072-bit group with g = 5 and SHA-512, the
//! username `Pair-Setup`, and proofs in the RFC 2945 form
//! `M1 = H(H(N) xor H(g), H(I), s, A, B, K)` / `M2 = H(A, M1, K)` computed
//! over the 384-byte wire representations of the public keys. The shared
//! key `K = H(S)` is 64 bytes.
//!
//! The exchange is deliberately three-phase (`new` -> `compute_key` ->
//! `verify_proof`): the dispatcher derives the M5 session key from the
//! shared secret before checking the controller proof, and an M3 proof
//! mismatch must leave the pairing open for a retry.

use num_bigint::BigUint;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use super::CryptoError;

/// Wire length of the SRP public keys for the 3072-bit group
pub const PUBLIC_KEY_LEN: usize = 384;

/// Length of the SRP proofs and of the shared key (SHA-512 output)
pub const PROOF_LEN: usize = 64;

/// Length of the random salt
pub const SALT_LEN: usize = 16;

/// SRP group parameters
pub struct SrpParams {
    /// Big-endian modulus N
    pub modulus: &'static [u8],
    /// Big-endian generator g
    pub generator: &'static [u8],
}

impl SrpParams {
    /// The RFC 5054 3072-bit group used by HAP
    pub const HAP: SrpParams = SrpParams {
        modulus: &MODULUS_3072,
        generator: &[0x05],
    };
}

/// RFC 5054 3072-bit prime
const MODULUS_3072: [u8; 384] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68, 0xC2, 0x34,
    0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1, 0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74,
    0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
    0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37,
    0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45, 0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6,
    0xF4, 0x4C, 0x42, 0xE9, 0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED,
    0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE, 0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6,
    0x49, 0x28, 0x66, 0x51, 0xEC, 0xE4, 0x5B, 0x3D, 0xC2, 0x00, 0x7C, 0xB8, 0xA1, 0x63, 0xBF, 0x05,
    0x98, 0xDA, 0x48, 0x36, 0x1C, 0x55, 0xD3, 0x9A, 0x69, 0x16, 0x3F, 0xA8, 0xFD, 0x24, 0xCF, 0x5F,
    0x83, 0x65, 0x5D, 0x23, 0xDC, 0xA3, 0xAD, 0x96, 0x1C, 0x62, 0xF3, 0x56, 0x20, 0x85, 0x52, 0xBB,
    0x9E, 0xD5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6D, 0x67, 0x0C, 0x35, 0x4E, 0x4A, 0xBC, 0x98, 0x04,
    0xF1, 0x74, 0x6C, 0x08, 0xCA, 0x18, 0x21, 0x7C, 0x32, 0x90, 0x5E, 0x46, 0x2E, 0x36, 0xCE, 0x3B,
    0xE3, 0x9E, 0x77, 0x2C, 0x18, 0x0E, 0x86, 0x03, 0x9B, 0x27, 0x83, 0xA2, 0xEC, 0x07, 0xA2, 0x8F,
    0xB5, 0xC5, 0x5D, 0xF0, 0x6F, 0x4C, 0x52, 0xC9, 0xDE, 0x2B, 0xCB, 0xF6, 0x95, 0x58, 0x17, 0x18,
    0x39, 0x95, 0x49, 0x7C, 0xEA, 0x95, 0x6A, 0xE5, 0x15, 0xD2, 0x26, 0x18, 0x98, 0xFA, 0x05, 0x10,
    0x15, 0x72, 0x8E, 0x5A, 0x8A, 0xAA, 0xC4, 0x2D, 0xAD, 0x33, 0x17, 0x0D, 0x04, 0x50, 0x7A, 0x33,
    0xA8, 0x55, 0x21, 0xAB, 0xDF, 0x1C, 0xBA, 0x64, 0xEC, 0xFB, 0x85, 0x04, 0x58, 0xDB, 0xEF, 0x0A,
    0x8A, 0xEA, 0x71, 0x57, 0x5D, 0x06, 0x0C, 0x7D, 0xB3, 0x97, 0x0F, 0x85, 0xA6, 0xE1, 0xE4, 0xC7,
    0xAB, 0xF5, 0xAE, 0x8C, 0xDB, 0x09, 0x33, 0xD7, 0x1E, 0x8C, 0x94, 0xE0, 0x4A, 0x25, 0x61, 0x9D,
    0xCE, 0xE3, 0xD2, 0x26, 0x1A, 0xD2, 0xEE, 0x6B, 0xF1, 0x2F, 0xFA, 0x06, 0xD9, 0x8A, 0x08, 0x64,
    0xD8, 0x76, 0x02, 0x73, 0x3E, 0xC8, 0x6A, 0x64, 0x52, 0x1F, 0x2B, 0x18, 0x17, 0x7B, 0x20, 0x0C,
    0xBB, 0xE1, 0x17, 0x57, 0x7A, 0x61, 0x5D, 0x6C, 0x77, 0x09, 0x88, 0xC0, 0xBA, 0xD9, 0x46, 0xE2,
    0x08, 0xE2, 0x4F, 0xA0, 0x74, 0xE5, 0xAB, 0x31, 0x43, 0xDB, 0x5B, 0xFC, 0xE0, 0xFD, 0x10, 0x8E,
    0x4B, 0x82, 0xD1, 0x20, 0xA9, 0x3A, 0xD2, 0xCA, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

fn sha512(parts: &[&[u8]]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Left-pad big-endian bytes to `len`
fn pad_to(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

/// `x = H(s | H(I ":" P))`
fn private_key(username: &[u8], password: &[u8], salt: &[u8]) -> BigUint {
    let identity = sha512(&[username, b":", password]);
    BigUint::from_bytes_be(&sha512(&[salt, &identity]))
}

/// `H(N) xor H(g)`, the leading term of M1
fn hash_group(params: &SrpParams) -> [u8; 64] {
    let hn = sha512(&[params.modulus]);
    let hg = sha512(&[params.generator]);
    let mut out = [0u8; 64];
    for (o, (a, b)) in out.iter_mut().zip(hn.iter().zip(hg.iter())) {
        *o = a ^ b;
    }
    out
}

/// Derive the password verifier `v = g^x mod N`
#[must_use]
pub fn compute_verifier(
    username: &[u8],
    password: &[u8],
    salt: &[u8],
    params: &SrpParams,
) -> Vec<u8> {
    let n = BigUint::from_bytes_be(params.modulus);
    let g = BigUint::from_bytes_be(params.generator);
    let x = private_key(username, password, salt);
    g.modpow(&x, &n).to_bytes_be()
}

/// Server side of one SRP-6a exchange
pub struct SrpServer {
    n: BigUint,
    verifier: BigUint,
    secret: BigUint,
    public: Vec<u8>,
    group_hash: [u8; 64],
    // set by compute_key
    client_public: Option<Vec<u8>>,
    shared_key: Option<[u8; 64]>,
}

impl Drop for SrpServer {
    fn drop(&mut self) {
        if let Some(key) = self.shared_key.as_mut() {
            key.zeroize();
        }
    }
}

impl SrpServer {
    /// Create a server context: picks a random ephemeral secret `b` and
    /// computes the public key `B = k*v + g^b mod N`
    #[must_use]
    pub fn new(verifier: &[u8], params: &SrpParams) -> Self {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::with_secret(&secret, verifier, params)
    }

    /// Create a server context with a caller-supplied ephemeral secret
    #[must_use]
    pub fn with_secret(secret: &[u8], verifier: &[u8], params: &SrpParams) -> Self {
        let n = BigUint::from_bytes_be(params.modulus);
        let g = BigUint::from_bytes_be(params.generator);
        let v = BigUint::from_bytes_be(verifier);
        let b = BigUint::from_bytes_be(secret);

        // k = H(N | PAD(g))
        let k = BigUint::from_bytes_be(&sha512(&[
            params.modulus,
            &pad_to(params.generator, params.modulus.len()),
        ]));

        let public = (&k * &v + g.modpow(&b, &n)) % &n;
        let public = pad_to(&public.to_bytes_be(), params.modulus.len());

        Self {
            n,
            verifier: v,
            secret: b,
            public,
            group_hash: hash_group(params),
            client_public: None,
            shared_key: None,
        }
    }

    /// The 384-byte server public key `B`
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    /// Compute the shared key from the controller public key `A`
    ///
    /// `K = H((A * v^u)^b mod N)`, 64 bytes. Must be called before
    /// [`verify_proof`](Self::verify_proof).
    ///
    /// # Errors
    ///
    /// Rejects `A ≡ 0 (mod N)` and a zero scrambling parameter.
    pub fn compute_key(&mut self, client_public: &[u8]) -> Result<[u8; 64], CryptoError> {
        let a = BigUint::from_bytes_be(client_public);
        if (&a % &self.n) == BigUint::default() {
            return Err(CryptoError::Srp("client public key is zero mod N"));
        }

        // u = H(PAD(A) | PAD(B))
        let len = self.public.len();
        let u = BigUint::from_bytes_be(&sha512(&[&pad_to(client_public, len), &self.public]));
        if u == BigUint::default() {
            return Err(CryptoError::Srp("scrambling parameter is zero"));
        }

        let base = (&a * self.verifier.modpow(&u, &self.n)) % &self.n;
        let premaster = base.modpow(&self.secret, &self.n);
        let key = sha512(&[&premaster.to_bytes_be()]);

        self.client_public = Some(client_public.to_vec());
        self.shared_key = Some(key);
        Ok(key)
    }

    /// Check the controller proof `M1` and produce the server proof `M2`
    ///
    /// # Errors
    ///
    /// Fails when called before [`compute_key`](Self::compute_key) or when
    /// the proof does not match.
    pub fn verify_proof(
        &self,
        username: &[u8],
        salt: &[u8],
        client_proof: &[u8],
    ) -> Result<[u8; PROOF_LEN], CryptoError> {
        let (Some(client_public), Some(key)) = (&self.client_public, &self.shared_key) else {
            return Err(CryptoError::Srp("shared key not computed"));
        };

        let expected = sha512(&[
            &self.group_hash,
            &sha512(&[username]),
            salt,
            client_public,
            &self.public,
            key,
        ]);
        if client_proof != expected.as_slice() {
            return Err(CryptoError::Srp("client proof mismatch"));
        }

        Ok(sha512(&[client_public, &expected, key]))
    }
}

#[cfg(test)]
pub(crate) mod test_client {
    //! Controller side of the exchange, for the handshake tests only.

    use super::*;

    pub struct SrpClient {
        n: BigUint,
        g: BigUint,
        k: BigUint,
        secret: BigUint,
        public: Vec<u8>,
        group_hash: [u8; 64],
    }

    impl SrpClient {
        pub fn new(params: &SrpParams) -> Self {
            use rand::RngCore;
            let mut secret = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut secret);

            let n = BigUint::from_bytes_be(params.modulus);
            let g = BigUint::from_bytes_be(params.generator);
            let a = BigUint::from_bytes_be(&secret);
            let k = BigUint::from_bytes_be(&sha512(&[
                params.modulus,
                &pad_to(params.generator, params.modulus.len()),
            ]));
            let public = pad_to(&g.modpow(&a, &n).to_bytes_be(), params.modulus.len());

            Self {
                n,
                g,
                k,
                secret: a,
                public,
                group_hash: hash_group(params),
            }
        }

        pub fn public_key(&self) -> &[u8] {
            &self.public
        }

        /// Process the server challenge; returns (K, M1)
        pub fn process_challenge(
            &self,
            username: &[u8],
            password: &[u8],
            salt: &[u8],
            server_public: &[u8],
        ) -> ([u8; 64], [u8; PROOF_LEN]) {
            let b_pub = BigUint::from_bytes_be(server_public);
            assert!((&b_pub % &self.n) != BigUint::default());

            let len = self.public.len();
            let u =
                BigUint::from_bytes_be(&sha512(&[&self.public, &pad_to(server_public, len)]));
            let x = private_key(username, password, salt);

            // S = (B - k*g^x) ^ (a + u*x) mod N
            let kgx = (&self.k * self.g.modpow(&x, &self.n)) % &self.n;
            let base = (&b_pub + &self.n - kgx) % &self.n;
            let exponent = &self.secret + &u * &x;
            let premaster = base.modpow(&exponent, &self.n);
            let key = sha512(&[&premaster.to_bytes_be()]);

            let proof = sha512(&[
                &self.group_hash,
                &sha512(&[username]),
                salt,
                &self.public,
                server_public,
                &key,
            ]);
            (key, proof)
        }

        /// Expected server proof for a computed (K, M1)
        pub fn expected_server_proof(&self, key: &[u8; 64], proof: &[u8; 64]) -> [u8; 64] {
            sha512(&[&self.public, proof, key])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_client::SrpClient;
    use super::*;

    const USERNAME: &[u8] = b"Pair-Setup";
    const PASSWORD: &[u8] = b"000-11-000";
    const SALT: [u8; SALT_LEN] = [0x5A; SALT_LEN];

    #[test]
    fn test_handshake_agrees() {
        let verifier = compute_verifier(USERNAME, PASSWORD, &SALT, &SrpParams::HAP);
        let mut server = SrpServer::new(&verifier, &SrpParams::HAP);
        assert_eq!(server.public_key().len(), PUBLIC_KEY_LEN);

        let client = SrpClient::new(&SrpParams::HAP);
        let (client_key, client_proof) =
            client.process_challenge(USERNAME, PASSWORD, &SALT, server.public_key());

        let server_key = server.compute_key(client.public_key()).unwrap();
        assert_eq!(server_key, client_key);

        let server_proof = server
            .verify_proof(USERNAME, &SALT, &client_proof)
            .unwrap();
        assert_eq!(
            server_proof,
            client.expected_server_proof(&client_key, &client_proof)
        );
    }

    #[test]
    fn test_wrong_password_rejected() {
        let verifier = compute_verifier(USERNAME, PASSWORD, &SALT, &SrpParams::HAP);
        let mut server = SrpServer::new(&verifier, &SrpParams::HAP);

        let client = SrpClient::new(&SrpParams::HAP);
        let (_, bad_proof) =
            client.process_challenge(USERNAME, b"999-99-999", &SALT, server.public_key());

        server.compute_key(client.public_key()).unwrap();
        assert!(server.verify_proof(USERNAME, &SALT, &bad_proof).is_err());
    }

    #[test]
    fn test_zero_client_key_rejected() {
        let verifier = compute_verifier(USERNAME, PASSWORD, &SALT, &SrpParams::HAP);
        let mut server = SrpServer::new(&verifier, &SrpParams::HAP);

        assert!(server.compute_key(&[0u8; PUBLIC_KEY_LEN]).is_err());
        assert!(server.compute_key(SrpParams::HAP.modulus).is_err());
    }

    #[test]
    fn test_proof_requires_computed_key() {
        let verifier = compute_verifier(USERNAME, PASSWORD, &SALT, &SrpParams::HAP);
        let server = SrpServer::new(&verifier, &SrpParams::HAP);
        assert!(server.verify_proof(USERNAME, &SALT, &[0u8; 64]).is_err());
    }

    #[test]
    fn test_verifier_depends_on_salt() {
        let v1 = compute_verifier(USERNAME, PASSWORD, &[1u8; 16], &SrpParams::HAP);
        let v2 = compute_verifier(USERNAME, PASSWORD, &[2u8; 16], &SrpParams::HAP);
        assert_ne!(v1, v2);
    }
}
