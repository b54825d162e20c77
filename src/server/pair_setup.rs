//! Pair-Setup: SRP-6a pairing over the one-time setup code
//!
//! Process-wide singleton exchange. M1 claims ownership and answers the
//! SRP challenge, M3 proves the setup code and derives the M5 session key,
//! M5 exchanges long-term identities inside ChaCha20-Poly1305 sub-TLVs and
//! commits the pairing.

use rand::RngCore;
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::{PairSetupContext, Server, Sid, MAX_AUTH_ATTEMPTS};
use crate::db::AttributeDb;
use crate::pairings::{Permission, CONTROLLER_KEY_LEN};
use crate::protocol::crypto::{
    compute_verifier, derive_key, verify_signature, AeadCipher, Nonce, SrpParams, SrpServer,
    PROOF_LEN, PUBLIC_KEY_LEN, SALT_LEN,
};
use crate::protocol::tlv::{errors, methods, states, TlvDecoder, TlvEncoder, TlvType};

/// SRP username fixed by the protocol
pub(super) const PAIR_SETUP_USERNAME: &[u8] = b"Pair-Setup";

enum M3Outcome {
    Proof([u8; PROOF_LEN]),
    AuthFailed,
    HardFailed,
}

impl<D: AttributeDb> Server<D> {
    pub(super) fn owns_setup(&self, sid: Sid) -> bool {
        self.pair_setup.as_ref().is_some_and(|ctx| ctx.owner == sid)
    }

    fn release_setup(&mut self, sid: Sid) {
        if self.owns_setup(sid) {
            self.pair_setup = None;
        }
    }

    /// Hard failure: release the singleton and answer `Error = Unknown`
    fn setup_failed(&mut self, sid: Sid, out: TlvEncoder) -> Vec<u8> {
        self.release_setup(sid);
        out.add_error(errors::UNKNOWN).build()
    }

    /// M1 -> M2: start the SRP exchange
    pub(super) fn pair_setup_m1(&mut self, sid: Sid, tlv: &TlvDecoder) -> Vec<u8> {
        info!(sid, "pair-setup M1");
        let out = TlvEncoder::new().add_state(states::M2);

        match tlv.get_u8(TlvType::Method) {
            Some(methods::PAIR_SETUP_NON_MFI) => {}
            other => {
                warn!(sid, method = ?other, "pair-setup method missing or unsupported");
                return self.setup_failed(sid, out);
            }
        }

        if !self.pairings.is_empty() {
            info!(sid, "pair-setup unavailable while paired");
            return out.add_error(errors::UNAVAILABLE).build();
        }
        if self.auth_attempts > MAX_AUTH_ATTEMPTS {
            warn!(sid, attempts = self.auth_attempts, "too many pair-setup attempts");
            return out.add_error(errors::MAX_TRIES).build();
        }
        if self.pair_setup.as_ref().is_some_and(|ctx| ctx.owner != sid) {
            info!(sid, "pair-setup busy with another session");
            return out.add_error(errors::BUSY).build();
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let verifier = compute_verifier(
            PAIR_SETUP_USERNAME,
            self.config.setup_code.as_bytes(),
            &salt,
            &SrpParams::HAP,
        );
        let srp = SrpServer::new(&verifier, &SrpParams::HAP);
        let server_public = srp.public_key().to_vec();

        self.pair_setup = Some(PairSetupContext {
            owner: sid,
            srp,
            salt,
            shared_secret: None,
        });
        self.auth_attempts += 1;

        out.add(TlvType::PublicKey, &server_public)
            .add(TlvType::Salt, &salt)
            .build()
    }

    /// M3 -> M4: prove the setup code
    pub(super) fn pair_setup_m3(&mut self, sid: Sid, tlv: &TlvDecoder) -> Vec<u8> {
        info!(sid, "pair-setup M3");
        let out = TlvEncoder::new().add_state(states::M4);

        if !self.owns_setup(sid) {
            warn!(sid, "pair-setup M3 without active exchange");
            return self.setup_failed(sid, out);
        }

        let (ios_public, ios_proof) = match (
            tlv.get_exact(TlvType::PublicKey, PUBLIC_KEY_LEN),
            tlv.get_exact(TlvType::Proof, PROOF_LEN),
        ) {
            (Ok(public), Ok(proof)) => (public.to_vec(), proof.to_vec()),
            _ => {
                warn!(sid, "pair-setup M3 missing PublicKey or Proof");
                return self.setup_failed(sid, out);
            }
        };

        // the M5 session key is derived from the shared secret before the
        // proof is checked, so a retry can follow an authentication failure
        let outcome = match self.pair_setup.as_mut() {
            None => M3Outcome::HardFailed,
            Some(ctx) => match ctx.srp.compute_key(&ios_public) {
                Err(err) => {
                    warn!(sid, %err, "SRP key computation failed");
                    M3Outcome::HardFailed
                }
                Ok(shared_secret) => {
                    ctx.shared_secret = Some(Zeroizing::new(shared_secret));
                    match derive_key(
                        b"Pair-Setup-Encrypt-Salt",
                        &shared_secret,
                        b"Pair-Setup-Encrypt-Info",
                    ) {
                        Err(_) => M3Outcome::HardFailed,
                        Ok(session_key) => {
                            self.sessions[sid as usize].setup_key =
                                Some(Zeroizing::new(session_key));
                            match ctx.srp.verify_proof(
                                PAIR_SETUP_USERNAME,
                                &ctx.salt,
                                &ios_proof,
                            ) {
                                Ok(server_proof) => M3Outcome::Proof(server_proof),
                                Err(_) => M3Outcome::AuthFailed,
                            }
                        }
                    }
                }
            }
        };

        match outcome {
            M3Outcome::Proof(server_proof) => out.add(TlvType::Proof, &server_proof).build(),
            M3Outcome::AuthFailed => {
                // wrong setup code: keep the exchange open, the M1 attempt
                // counter is the throttle
                warn!(sid, "controller SRP proof mismatch");
                out.add_error(errors::AUTHENTICATION).build()
            }
            M3Outcome::HardFailed => self.setup_failed(sid, out),
        }
    }

    /// M5 -> M6: exchange long-term identities and commit the pairing
    pub(super) fn pair_setup_m5(&mut self, sid: Sid, tlv: &TlvDecoder) -> Vec<u8> {
        info!(sid, "pair-setup M5");
        let out = TlvEncoder::new().add_state(states::M6);

        if !self.owns_setup(sid) {
            warn!(sid, "pair-setup M5 without active exchange");
            return self.setup_failed(sid, out);
        }
        let shared_secret = self
            .pair_setup
            .as_ref()
            .and_then(|ctx| ctx.shared_secret.as_ref())
            .map(|secret| **secret);
        let Some(shared_secret) = shared_secret else {
            warn!(sid, "pair-setup M5 before M3");
            return self.setup_failed(sid, out);
        };
        let setup_key = self.sessions[sid as usize].setup_key.as_ref().map(|k| **k);
        let Some(setup_key) = setup_key else {
            return self.setup_failed(sid, out);
        };

        let Ok(encrypted) = tlv.get_required(TlvType::EncryptedData) else {
            warn!(sid, "pair-setup M5 missing EncryptedData");
            return self.setup_failed(sid, out);
        };

        let Ok(cipher) = AeadCipher::new(&setup_key) else {
            return self.setup_failed(sid, out);
        };
        let plaintext = match cipher.open(&Nonce::from_label(b"PS-Msg05"), b"", encrypted) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                warn!(sid, "pair-setup M5 auth tag mismatch");
                return out.add_error(errors::AUTHENTICATION).build();
            }
        };

        let Ok(sub_tlv) = TlvDecoder::decode(&plaintext) else {
            return self.setup_failed(sid, out);
        };
        let (Ok(ios_id), Ok(ios_ltpk), Ok(ios_signature)) = (
            sub_tlv.get_required(TlvType::Identifier),
            sub_tlv.get_exact(TlvType::PublicKey, CONTROLLER_KEY_LEN),
            sub_tlv.get_exact(TlvType::Signature, 64),
        ) else {
            warn!(sid, "pair-setup M5 sub-TLV incomplete");
            return self.setup_failed(sid, out);
        };

        // iOSDeviceInfo = iOSDeviceX || iosPairingId || iosLTPK, signed
        // with the submitted LTPK
        let Ok(ios_device_x) = derive_key(
            b"Pair-Setup-Controller-Sign-Salt",
            &shared_secret,
            b"Pair-Setup-Controller-Sign-Info",
        ) else {
            return self.setup_failed(sid, out);
        };
        let mut ios_info = Vec::with_capacity(32 + ios_id.len() + CONTROLLER_KEY_LEN);
        ios_info.extend_from_slice(&ios_device_x);
        ios_info.extend_from_slice(ios_id);
        ios_info.extend_from_slice(ios_ltpk);
        if verify_signature(ios_ltpk, &ios_info, ios_signature).is_err() {
            warn!(sid, "controller identity signature invalid");
            return out.add_error(errors::AUTHENTICATION).build();
        }

        if self
            .pairings
            .add(ios_id, ios_ltpk, Permission::Admin)
            .is_err()
        {
            warn!(sid, "pairings store rejected controller");
            return out.add_error(errors::MAX_PEERS).build();
        }

        // AccessoryInfo = AccessoryX || deviceId || accessoryLTPK
        let Ok(accessory_x) = derive_key(
            b"Pair-Setup-Accessory-Sign-Salt",
            &shared_secret,
            b"Pair-Setup-Accessory-Sign-Info",
        ) else {
            return self.setup_failed(sid, out);
        };
        let device_id = self.config.device_id.clone();
        let accessory_ltpk = self.keys.public_bytes();
        let mut accessory_info =
            Vec::with_capacity(32 + device_id.len() + accessory_ltpk.len());
        accessory_info.extend_from_slice(&accessory_x);
        accessory_info.extend_from_slice(device_id.as_bytes());
        accessory_info.extend_from_slice(&accessory_ltpk);
        let signature = self.keys.sign(&accessory_info);

        let sub_out = TlvEncoder::new()
            .add(TlvType::Identifier, device_id.as_bytes())
            .add(TlvType::PublicKey, &accessory_ltpk)
            .add(TlvType::Signature, &signature)
            .build();
        let Ok(encrypted_out) = cipher.seal(&Nonce::from_label(b"PS-Msg06"), b"", &sub_out)
        else {
            return self.setup_failed(sid, out);
        };

        self.pair_setup = None;
        self.sessions[sid as usize].setup_key = None;
        self.config_updated();
        info!(sid, "pair-setup complete");

        out.add(TlvType::EncryptedData, &encrypted_out).build()
    }
}
