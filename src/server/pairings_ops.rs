//! `/pairings` management: AddPairing, RemovePairing, ListPairings
//!
//! Secured sessions only; the calling controller must hold Admin
//! permission in the live store. Every mutation fires the configuration
//! update callback.

use tracing::{info, warn};

use super::{Reply, Server, Sid};
use crate::db::AttributeDb;
use crate::http::{content_types, HttpRequest, ResponseBuilder};
use crate::pairings::{Permission, CONTROLLER_KEY_LEN};
use crate::protocol::tlv::{errors, methods, states, TlvDecoder, TlvEncoder, TlvType};

impl<D: AttributeDb> Server<D> {
    pub(super) fn pairings_request(&mut self, sid: Sid, request: &HttpRequest) -> Reply {
        let Some(tlv) = Self::tlv_request(request) else {
            return Reply::plain(ResponseBuilder::bad_request().encode());
        };
        if tlv.get_state() != Some(states::M1) {
            warn!(sid, "pairings request with bad state");
            return Reply::plain(ResponseBuilder::bad_request().encode());
        }

        let body = match tlv.get_u8(TlvType::Method) {
            Some(methods::ADD_PAIRING) => self.pairing_add(sid, &tlv),
            Some(methods::REMOVE_PAIRING) => self.pairing_remove(sid, &tlv),
            Some(methods::LIST_PAIRINGS) => self.pairing_list(sid),
            other => {
                warn!(sid, method = ?other, "unknown pairings method");
                return Reply::plain(ResponseBuilder::bad_request().encode());
            }
        };
        Reply::plain(
            ResponseBuilder::ok()
                .body(content_types::PAIRING_TLV8, body)
                .encode(),
        )
    }

    /// Whether the session's bound controller currently holds Admin
    fn admin_gate(&self, sid: Sid) -> bool {
        self.sessions[sid as usize]
            .controller_id
            .as_deref()
            .and_then(|id| self.pairings.get(id))
            .is_some_and(|controller| controller.permission == Permission::Admin)
    }

    fn pairing_add(&mut self, sid: Sid, tlv: &TlvDecoder) -> Vec<u8> {
        info!(sid, "add pairing");
        let out = TlvEncoder::new().add_state(states::M2);

        if !self.admin_gate(sid) {
            warn!(sid, "add pairing denied: not admin");
            return out.add_error(errors::AUTHENTICATION).build();
        }

        let (Ok(id), Ok(ltpk)) = (
            tlv.get_required(TlvType::Identifier),
            tlv.get_exact(TlvType::PublicKey, CONTROLLER_KEY_LEN),
        ) else {
            return out.add_error(errors::UNKNOWN).build();
        };
        let Some(permission) = tlv.get_u8(TlvType::Permissions).and_then(Permission::from_byte)
        else {
            return out.add_error(errors::UNKNOWN).build();
        };

        let existing_ltpk = self.pairings.get(id).map(|c| c.ltpk);
        if let Some(stored) = existing_ltpk {
            // same identifier may only re-register with the same LTPK
            if stored[..] != *ltpk {
                warn!(sid, "add pairing LTPK mismatch");
                return out.add_error(errors::UNKNOWN).build();
            }
            self.pairings.update(id, permission);
        } else if self.pairings.add(id, ltpk, permission).is_err() {
            warn!(sid, "pairings store full");
            return out.add_error(errors::MAX_PEERS).build();
        }

        self.config_updated();
        out.build()
    }

    fn pairing_remove(&mut self, sid: Sid, tlv: &TlvDecoder) -> Vec<u8> {
        info!(sid, "remove pairing");
        let out = TlvEncoder::new().add_state(states::M2);

        if !self.admin_gate(sid) {
            warn!(sid, "remove pairing denied: not admin");
            return out.add_error(errors::AUTHENTICATION).build();
        }

        let Ok(id) = tlv.get_required(TlvType::Identifier) else {
            return out.add_error(errors::UNKNOWN).build();
        };
        if !self.pairings.remove(id) {
            warn!(sid, "remove pairing: identifier not found");
            return out.add_error(errors::UNKNOWN).build();
        }

        // every session bound to the removed controller must close; the
        // transport drains the flags and performs the actual close
        for sess in &mut self.sessions {
            if sess.open && sess.controller_id.as_deref() == Some(id) {
                sess.close_pending = true;
            }
        }

        self.config_updated();
        out.build()
    }

    fn pairing_list(&mut self, sid: Sid) -> Vec<u8> {
        info!(sid, "list pairings");
        let mut out = TlvEncoder::new().add_state(states::M2);

        if !self.admin_gate(sid) {
            warn!(sid, "list pairings denied: not admin");
            return out.add_error(errors::AUTHENTICATION).build();
        }

        let mut first = true;
        for controller in self.pairings.iter() {
            if !first {
                out = out.add_separator();
            }
            out = out
                .add(TlvType::Identifier, &controller.id)
                .add(TlvType::PublicKey, &controller.ltpk)
                .add_u8(TlvType::Permissions, controller.permission as u8);
            first = false;
        }
        out.build()
    }
}
