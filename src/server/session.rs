use zeroize::Zeroizing;

use super::secure_channel::SecureChannel;
use crate::http::HttpParser;

/// Pair-Verify state parked on the session between M1 and M3
pub(crate) struct VerifyState {
    /// HKDF key encrypting the PV-Msg02/PV-Msg03 sub-TLVs
    pub session_key: Zeroizing<[u8; 32]>,
    /// Curve25519 shared secret
    pub shared_secret: Zeroizing<[u8; 32]>,
    /// Accessory ephemeral public key
    pub accessory_public: [u8; 32],
    /// Controller ephemeral public key
    pub ios_public: [u8; 32],
}

/// Per-connection state
///
/// A session is created on accept and destroyed on close; everything in it
/// is scoped to one TCP connection.
pub(crate) struct Session {
    pub open: bool,
    /// Set only after the Pair-Verify M4 response has been handed off
    pub secured: bool,
    /// Identifier of the controller bound at Pair-Verify M3
    pub controller_id: Option<Vec<u8>>,
    /// Flagged when the bound controller is removed; transport closes us
    pub close_pending: bool,
    /// Record layer, present while `secured`
    pub channel: Option<SecureChannel>,
    /// Channel staged at M3, committed after the M4 response is sent
    pub pending_channel: Option<SecureChannel>,
    /// Pair-Setup session key derived at M3, consumed at M5
    pub setup_key: Option<Zeroizing<[u8; 32]>>,
    /// Pair-Verify ephemeral state (one exchange lifetime)
    pub verify: Option<VerifyState>,
    /// Unsecured-request accumulation
    pub parser: HttpParser,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            open: false,
            secured: false,
            controller_id: None,
            close_pending: false,
            channel: None,
            pending_channel: None,
            setup_key: None,
            verify: None,
            parser: HttpParser::new(),
        }
    }

    /// Reset into the open state for a fresh connection
    pub(crate) fn open(&mut self) {
        *self = Self::new();
        self.open = true;
    }

    /// Tear down all connection state
    pub(crate) fn close(&mut self) {
        *self = Self::new();
    }
}
