//! Pair-Verify: session re-establishment from exchanged long-term keys
//!
//! M1 answers with a fresh Curve25519 key and a signed, encrypted
//! accessory identity; M3 authenticates the controller against the
//! pairings store and derives the record-layer keys. The session flips to
//! secured only after the M4 response has been handed off.

use tracing::{info, warn};
use zeroize::Zeroizing;

use super::secure_channel::SecureChannel;
use super::session::VerifyState;
use super::{Server, Sid};
use crate::db::AttributeDb;
use crate::protocol::crypto::{derive_key, verify_signature, AeadCipher, EphemeralKeys, Nonce};
use crate::protocol::tlv::{errors, states, TlvDecoder, TlvEncoder, TlvType};

impl<D: AttributeDb> Server<D> {
    /// M1 -> M2: ECDH, sign the accessory info, park the exchange state
    pub(super) fn pair_verify_m1(&mut self, sid: Sid, tlv: &TlvDecoder) -> Vec<u8> {
        info!(sid, "pair-verify M1");
        let out = TlvEncoder::new().add_state(states::M2);

        let Ok(ios_public) = tlv.get_exact(TlvType::PublicKey, 32) else {
            warn!(sid, "pair-verify M1 missing PublicKey");
            return out.add_error(errors::UNKNOWN).build();
        };
        let ios_public_arr: [u8; 32] = match ios_public.try_into() {
            Ok(arr) => arr,
            Err(_) => return out.add_error(errors::UNKNOWN).build(),
        };

        let ephemeral = EphemeralKeys::generate();
        let Ok(shared_secret) = ephemeral.shared_secret(ios_public) else {
            return out.add_error(errors::UNKNOWN).build();
        };
        let Ok(session_key) = derive_key(
            b"Pair-Verify-Encrypt-Salt",
            shared_secret.as_bytes(),
            b"Pair-Verify-Encrypt-Info",
        ) else {
            return out.add_error(errors::UNKNOWN).build();
        };

        // AccessoryInfo = accessoryCurvePub || deviceId || iosCurvePub
        let accessory_public = ephemeral.public_bytes();
        let device_id = self.config.device_id.as_bytes();
        let mut accessory_info = Vec::with_capacity(64 + device_id.len());
        accessory_info.extend_from_slice(&accessory_public);
        accessory_info.extend_from_slice(device_id);
        accessory_info.extend_from_slice(ios_public);
        let signature = self.keys.sign(&accessory_info);

        let sub_tlv = TlvEncoder::new()
            .add(TlvType::Identifier, device_id)
            .add(TlvType::Signature, &signature)
            .build();
        let Ok(cipher) = AeadCipher::new(&session_key) else {
            return out.add_error(errors::UNKNOWN).build();
        };
        let Ok(encrypted) = cipher.seal(&Nonce::from_label(b"PV-Msg02"), b"", &sub_tlv) else {
            return out.add_error(errors::UNKNOWN).build();
        };

        self.sessions[sid as usize].verify = Some(VerifyState {
            session_key: Zeroizing::new(session_key),
            shared_secret: Zeroizing::new(*shared_secret.as_bytes()),
            accessory_public,
            ios_public: ios_public_arr,
        });

        out.add(TlvType::PublicKey, &accessory_public)
            .add(TlvType::EncryptedData, &encrypted)
            .build()
    }

    /// M3 -> M4: authenticate the controller, derive transport keys
    ///
    /// Returns the response TLV and whether the session secures after the
    /// response is sent.
    pub(super) fn pair_verify_m3(&mut self, sid: Sid, tlv: &TlvDecoder) -> (Vec<u8>, bool) {
        info!(sid, "pair-verify M3");
        let out = TlvEncoder::new().add_state(states::M4);
        let idx = sid as usize;

        let (session_key, shared_secret, accessory_public, ios_public) =
            match &self.sessions[idx].verify {
                Some(state) => (
                    *state.session_key,
                    *state.shared_secret,
                    state.accessory_public,
                    state.ios_public,
                ),
                None => {
                    warn!(sid, "pair-verify M3 without M1");
                    return (out.add_error(errors::UNKNOWN).build(), false);
                }
            };

        let Ok(encrypted) = tlv.get_required(TlvType::EncryptedData) else {
            warn!(sid, "pair-verify M3 missing EncryptedData");
            return (out.add_error(errors::UNKNOWN).build(), false);
        };
        let Ok(cipher) = AeadCipher::new(&session_key) else {
            return (out.add_error(errors::UNKNOWN).build(), false);
        };
        let plaintext = match cipher.open(&Nonce::from_label(b"PV-Msg03"), b"", encrypted) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                warn!(sid, "pair-verify M3 auth tag mismatch");
                return (out.add_error(errors::AUTHENTICATION).build(), false);
            }
        };

        let Ok(sub_tlv) = TlvDecoder::decode(&plaintext) else {
            return (out.add_error(errors::UNKNOWN).build(), false);
        };
        let (Ok(ios_id), Ok(ios_signature)) = (
            sub_tlv.get_required(TlvType::Identifier),
            sub_tlv.get_exact(TlvType::Signature, 64),
        ) else {
            warn!(sid, "pair-verify M3 sub-TLV incomplete");
            return (out.add_error(errors::UNKNOWN).build(), false);
        };

        let Some(controller) = self.pairings.get(ios_id) else {
            info!(sid, "controller not in pairings store");
            return (out.add_error(errors::AUTHENTICATION).build(), false);
        };

        // iOSDeviceInfo = iosCurvePub || iosPairingId || accessoryCurvePub
        let mut ios_info = Vec::with_capacity(64 + ios_id.len());
        ios_info.extend_from_slice(&ios_public);
        ios_info.extend_from_slice(ios_id);
        ios_info.extend_from_slice(&accessory_public);
        if verify_signature(&controller.ltpk, &ios_info, ios_signature).is_err() {
            warn!(sid, "controller signature invalid");
            return (out.add_error(errors::AUTHENTICATION).build(), false);
        }

        let (Ok(a2c_key), Ok(c2a_key)) = (
            derive_key(b"Control-Salt", &shared_secret, b"Control-Read-Encryption-Key"),
            derive_key(b"Control-Salt", &shared_secret, b"Control-Write-Encryption-Key"),
        ) else {
            return (out.add_error(errors::UNKNOWN).build(), false);
        };
        let Ok(channel) = SecureChannel::new(&a2c_key, &c2a_key) else {
            return (out.add_error(errors::UNKNOWN).build(), false);
        };

        let controller_id = ios_id.to_vec();
        let sess = &mut self.sessions[idx];
        sess.pending_channel = Some(channel);
        sess.controller_id = Some(controller_id);
        sess.verify = None;

        info!(sid, "pair-verify complete");
        (out.build(), true)
    }
}
