//! The accessory server: session table, request dispatch, event polling
//!
//! One `Server` owns all protocol state. A transport (TCP driver) accepts
//! connections, allocates sessions with [`Server::open`], and drives each
//! ready session through [`Server::process`] / [`Server::poll`] with
//! synchronous recv/send callbacks. Handlers run to completion; there is no
//! locking because everything happens on the dispatch thread.

mod pair_setup;
mod pair_verify;
mod pairings_ops;
mod secure_channel;
mod session;

#[cfg(test)]
mod tests;

pub use self::secure_channel::{ChannelError, SecureChannel, MAX_BLOCK, MAX_FRAME};

use std::io;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use self::session::Session;
use crate::config::{AccessoryConfig, Snapshot};
use crate::db::AttributeDb;
use crate::error::{HapError, Result};
use crate::http::{content_types, HttpRequest, Method, ResponseBuilder, StatusCode};
use crate::pairings::Pairings;
use crate::protocol::crypto::{LongTermKeys, SrpServer};
use crate::protocol::tlv::{states, TlvDecoder};

/// Session identifier, `0..MAX_SESSIONS`
pub type Sid = u8;

/// Maximum concurrent HTTP sessions
pub const MAX_SESSIONS: usize = 8;

/// Pair-Setup attempts allowed before `MaxTries`
pub const MAX_AUTH_ATTEMPTS: u32 = 100;

/// Process-wide Pair-Setup state; at most one controller pairs at a time
pub(crate) struct PairSetupContext {
    /// Session that owns the exchange
    pub owner: Sid,
    /// SRP server for this exchange
    pub srp: SrpServer,
    /// Salt sent in M2
    pub salt: [u8; 16],
    /// 64-byte SRP shared secret, set at M3
    pub shared_secret: Option<Zeroizing<[u8; 64]>>,
}

/// A routed response plus the deferred secure-transition flag
struct Reply {
    bytes: Vec<u8>,
    /// Commit `secured = true` after this response is handed off
    secure: bool,
}

impl Reply {
    fn plain(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            secure: false,
        }
    }
}

/// The HAP accessory server
pub struct Server<D: AttributeDb> {
    config: AccessoryConfig,
    keys: LongTermKeys,
    pairings: Pairings,
    db: D,
    sessions: Vec<Session>,
    pair_setup: Option<PairSetupContext>,
    auth_attempts: u32,
    update_callback: Option<Box<dyn FnMut(&AccessoryConfig)>>,
}

impl<D: AttributeDb> Server<D> {
    /// Create a server with a freshly generated accessory identity
    #[must_use]
    pub fn new(config: AccessoryConfig, db: D) -> Self {
        Self::with_keys(config, LongTermKeys::generate(), db)
    }

    /// Create a server with a restored accessory identity
    #[must_use]
    pub fn with_keys(config: AccessoryConfig, keys: LongTermKeys, db: D) -> Self {
        Self {
            config,
            keys,
            pairings: Pairings::new(),
            db,
            sessions: (0..MAX_SESSIONS).map(|_| Session::new()).collect(),
            pair_setup: None,
            auth_attempts: 0,
            update_callback: None,
        }
    }

    /// Rebuild a server from a persisted snapshot
    ///
    /// # Errors
    ///
    /// Fails when the key material in the snapshot is malformed.
    pub fn restore(snapshot: &Snapshot, db: D) -> Result<Self> {
        let secret = hex::decode(&snapshot.keys[1]).map_err(|_| HapError::Restore {
            message: "long-term secret key is not hex".to_string(),
        })?;
        let keys = LongTermKeys::from_secret_bytes(&secret)?;

        let mut server = Self::with_keys(snapshot.to_config(), keys, db);
        server.pairings = Pairings::restore(&snapshot.pairings);
        let paired = !server.pairings.is_empty();
        server.config.sync_paired_flag(paired);
        Ok(server)
    }

    /// Snapshot the whole persistable state
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            name: self.config.name.clone(),
            model: self.config.model.clone(),
            manufacturer: self.config.manufacturer.clone(),
            serial: self.config.serial_number.clone(),
            firmware: self.config.firmware_revision.clone(),
            device_id: self.config.device_id.clone(),
            config: self.config.config_number,
            category: self.config.category_id,
            status: self.config.status_flags,
            setup: self.config.setup_code.clone(),
            port: self.config.port,
            keys: [
                hex::encode(self.keys.public_bytes()),
                hex::encode(self.keys.secret_bytes()),
            ],
            pairings: self.pairings.snapshot(),
        }
    }

    /// Register the configuration update callback
    ///
    /// Invoked after every mutation that must be persisted and
    /// re-advertised (pairing added/removed, status flags changed).
    pub fn on_update(&mut self, callback: impl FnMut(&AccessoryConfig) + 'static) {
        self.update_callback = Some(Box::new(callback));
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> &AccessoryConfig {
        &self.config
    }

    /// The pairings store
    #[must_use]
    pub fn pairings(&self) -> &Pairings {
        &self.pairings
    }

    /// Mutable pairings access, for provisioning and tests
    pub fn pairings_mut(&mut self) -> &mut Pairings {
        &mut self.pairings
    }

    /// The attribute database
    pub fn db_mut(&mut self) -> &mut D {
        &mut self.db
    }

    /// The accessory long-term public key
    #[must_use]
    pub fn accessory_ltpk(&self) -> [u8; 32] {
        self.keys.public_bytes()
    }

    /// Factory reset: wipe all pairings, regenerate the device id and the
    /// long-term keypair, and fire the update callback
    ///
    /// The Pair-Setup attempt counter is deliberately left alone; it never
    /// resets within a process lifetime.
    pub fn factory_reset(&mut self) {
        info!("factory reset");
        self.pairings.clear();
        self.keys = LongTermKeys::generate();
        self.config.factory_reset();
        self.pair_setup = None;
        self.config_updated();
    }

    /// Allocate the lowest free session id
    pub fn open(&mut self) -> Option<Sid> {
        let idx = self.sessions.iter().position(|s| !s.open)?;
        self.sessions[idx].open();
        #[allow(clippy::cast_possible_truncation)]
        let sid = idx as Sid;
        self.db.open(sid);
        info!(sid, "session opened");
        Some(sid)
    }

    /// Close a session, aborting any Pair-Setup it owns
    pub fn close(&mut self, sid: Sid) -> bool {
        let idx = sid as usize;
        if idx >= MAX_SESSIONS || !self.sessions[idx].open {
            return false;
        }
        self.db.close(sid);
        self.sessions[idx].close();
        if self.pair_setup.as_ref().is_some_and(|ctx| ctx.owner == sid) {
            info!(sid, "pair-setup aborted by session close");
            self.pair_setup = None;
        }
        info!(sid, "session closed");
        true
    }

    /// Sessions flagged for closure by a pairing removal
    ///
    /// The transport drains this after each `process` call and closes the
    /// listed sessions.
    pub fn take_pending_closures(&mut self) -> Vec<Sid> {
        let mut out = Vec::new();
        for (idx, sess) in self.sessions.iter_mut().enumerate() {
            if sess.open && sess.close_pending {
                sess.close_pending = false;
                #[allow(clippy::cast_possible_truncation)]
                out.push(idx as Sid);
            }
        }
        out
    }

    /// One request/response cycle
    ///
    /// Pulls bytes through `recv` until a complete request is parsed
    /// (decrypting records first on a secured session), routes it, and
    /// writes the response through `send` (encrypting on a secured
    /// session). Returns `false` when the session must be closed: read
    /// error or EOF, oversized record, authentication failure on a record,
    /// or unparseable HTTP.
    pub fn process<R, S>(&mut self, sid: Sid, mut recv: R, mut send: S) -> bool
    where
        R: FnMut(&mut [u8]) -> io::Result<usize>,
        S: FnMut(&[u8]) -> io::Result<()>,
    {
        let idx = sid as usize;
        if idx >= MAX_SESSIONS || !self.sessions[idx].open {
            return false;
        }

        let request = loop {
            match Self::try_parse(sid, &mut self.sessions[idx]) {
                Err(()) => return false,
                Ok(Some(request)) => break request,
                Ok(None) => {}
            }

            let mut scratch = [0u8; 2 * MAX_FRAME];
            let n = match recv(&mut scratch) {
                Ok(0) => {
                    debug!(sid, "read EOF");
                    return false;
                }
                Ok(n) => n,
                Err(err) => {
                    debug!(sid, %err, "read error");
                    return false;
                }
            };

            let sess = &mut self.sessions[idx];
            if sess.secured {
                match sess.channel.as_mut() {
                    Some(channel) => channel.feed(&scratch[..n]),
                    None => return false,
                }
            } else {
                sess.parser.feed(&scratch[..n]);
            }
        };

        let reply = self.route(sid, &request);
        if !self.send_reply(sid, &reply.bytes, &mut send) {
            return false;
        }

        // deferred transition: the Pair-Verify M4 response itself goes out
        // in the clear, everything after it is records
        if reply.secure {
            let sess = &mut self.sessions[idx];
            if let Some(channel) = sess.pending_channel.take() {
                sess.channel = Some(channel);
                sess.secured = true;
                sess.parser.reset();
                info!(sid, "session secured");
            }
        }

        true
    }

    /// Deliver pending events, if any, as an `EVENT/1.0` response
    ///
    /// No-op on unsecured sessions. Returns `false` when sending failed and
    /// the session must be closed.
    pub fn poll<S>(&mut self, sid: Sid, mut send: S) -> bool
    where
        S: FnMut(&[u8]) -> io::Result<()>,
    {
        let idx = sid as usize;
        if idx >= MAX_SESSIONS || !self.sessions[idx].open || !self.sessions[idx].secured {
            return true;
        }
        let Some(body) = self.db.get_events(sid) else {
            return true;
        };

        debug!(sid, "delivering characteristic events");
        let bytes = ResponseBuilder::event()
            .body(content_types::HAP_JSON, body.into_bytes())
            .encode();
        self.send_reply(sid, &bytes, &mut send)
    }

    // === internal plumbing ===

    /// Try to produce a complete request from buffered session state.
    /// `Err(())` is fatal to the session.
    fn try_parse(sid: Sid, sess: &mut Session) -> std::result::Result<Option<HttpRequest>, ()> {
        if sess.secured {
            let Some(channel) = sess.channel.as_mut() else {
                return Err(());
            };
            match channel.read_frame() {
                Ok(Some(plaintext)) => {
                    sess.parser.feed(&plaintext);
                    match sess.parser.decode() {
                        Ok(Some(request)) => Ok(Some(request)),
                        Ok(None) => {
                            // a secured request must fit in one record
                            warn!(sid, "secured request spans multiple records");
                            Err(())
                        }
                        Err(err) => {
                            warn!(sid, %err, "bad HTTP in record");
                            Err(())
                        }
                    }
                }
                Ok(None) => Ok(None),
                Err(err) => {
                    warn!(sid, %err, "record layer failure");
                    Err(())
                }
            }
        } else {
            match sess.parser.decode() {
                Ok(request) => Ok(request),
                Err(err) => {
                    warn!(sid, %err, "bad HTTP request");
                    Err(())
                }
            }
        }
    }

    fn send_reply<S>(&mut self, sid: Sid, bytes: &[u8], send: &mut S) -> bool
    where
        S: FnMut(&[u8]) -> io::Result<()>,
    {
        let sess = &mut self.sessions[sid as usize];
        if sess.secured {
            let Some(channel) = sess.channel.as_mut() else {
                return false;
            };
            let frames = match channel.seal_frames(bytes) {
                Ok(frames) => frames,
                Err(err) => {
                    warn!(sid, %err, "encrypt failure");
                    return false;
                }
            };
            for frame in frames {
                if let Err(err) = send(&frame) {
                    debug!(sid, %err, "send error");
                    return false;
                }
            }
            true
        } else {
            match send(bytes) {
                Ok(()) => true,
                Err(err) => {
                    debug!(sid, %err, "send error");
                    false
                }
            }
        }
    }

    fn route(&mut self, sid: Sid, request: &HttpRequest) -> Reply {
        let secured = self.sessions[sid as usize].secured;
        debug!(
            sid,
            method = request.method.as_str(),
            path = %request.path,
            secured,
            "dispatch"
        );

        match (request.method, request.path.as_str()) {
            (Method::Post, "/identify") => Reply::plain(self.identify()),
            (Method::Post, "/pair-setup") => self.pair_setup_request(sid, request),
            (Method::Post, "/pair-verify") => self.pair_verify_request(sid, request),
            (Method::Post, "/pairings") => {
                if !secured {
                    return Reply::plain(ResponseBuilder::auth_required().encode());
                }
                self.pairings_request(sid, request)
            }
            (Method::Get, "/accessories") => {
                if !secured {
                    return Reply::plain(ResponseBuilder::auth_required().encode());
                }
                let body = self.db.get_db(sid);
                Reply::plain(
                    ResponseBuilder::ok()
                        .body(content_types::HAP_JSON, body.into_bytes())
                        .encode(),
                )
            }
            (Method::Get, "/characteristics") => {
                if !secured {
                    return Reply::plain(ResponseBuilder::auth_required().encode());
                }
                let Some(query) = request.query.as_deref() else {
                    return Reply::plain(ResponseBuilder::bad_request().encode());
                };
                let (code, body) = self.db.read(sid, query);
                Reply::plain(Self::db_response(code, body))
            }
            (Method::Put, "/characteristics") => {
                if !secured {
                    return Reply::plain(ResponseBuilder::auth_required().encode());
                }
                if !request.headers.content_type_is(content_types::HAP_JSON)
                    || request.headers.content_length().is_none()
                {
                    return Reply::plain(ResponseBuilder::bad_request().encode());
                }
                let (code, body) = self.db.write(sid, &request.body);
                Reply::plain(Self::db_response(code, body))
            }
            _ => {
                warn!(sid, path = %request.path, "unknown path");
                Reply::plain(ResponseBuilder::bad_request().encode())
            }
        }
    }

    fn db_response(code: StatusCode, body: Option<String>) -> Vec<u8> {
        match body {
            Some(body) => ResponseBuilder::new(code)
                .body(content_types::HAP_JSON, body.into_bytes())
                .encode(),
            None => ResponseBuilder::new(code).encode(),
        }
    }

    /// `POST /identify`: permitted only while unpaired
    fn identify(&mut self) -> Vec<u8> {
        if self.pairings.is_empty() {
            info!("unpaired identify");
            ResponseBuilder::no_content().encode()
        } else {
            warn!("identify rejected while paired");
            ResponseBuilder::bad_request()
                .body(
                    content_types::HAP_JSON,
                    br#"{"status":-70401}"#.to_vec(),
                )
                .encode()
        }
    }

    /// Validate the pairing-TLV envelope: content type, content length,
    /// decodable body
    fn tlv_request(request: &HttpRequest) -> Option<TlvDecoder> {
        if !request.headers.content_type_is(content_types::PAIRING_TLV8) {
            return None;
        }
        request.headers.content_length()?;
        TlvDecoder::decode(&request.body).ok()
    }

    fn pair_setup_request(&mut self, sid: Sid, request: &HttpRequest) -> Reply {
        let Some(tlv) = Self::tlv_request(request) else {
            return Reply::plain(ResponseBuilder::bad_request().encode());
        };
        let body = match tlv.get_state() {
            Some(states::M1) => self.pair_setup_m1(sid, &tlv),
            Some(states::M3) => self.pair_setup_m3(sid, &tlv),
            Some(states::M5) => self.pair_setup_m5(sid, &tlv),
            other => {
                warn!(sid, state = ?other, "unexpected pair-setup state");
                return Reply::plain(ResponseBuilder::bad_request().encode());
            }
        };
        Reply::plain(
            ResponseBuilder::ok()
                .body(content_types::PAIRING_TLV8, body)
                .encode(),
        )
    }

    fn pair_verify_request(&mut self, sid: Sid, request: &HttpRequest) -> Reply {
        let Some(tlv) = Self::tlv_request(request) else {
            return Reply::plain(ResponseBuilder::bad_request().encode());
        };
        let (body, secure) = match tlv.get_state() {
            Some(states::M1) => (self.pair_verify_m1(sid, &tlv), false),
            Some(states::M3) => self.pair_verify_m3(sid, &tlv),
            other => {
                warn!(sid, state = ?other, "unexpected pair-verify state");
                return Reply::plain(ResponseBuilder::bad_request().encode());
            }
        };
        Reply {
            bytes: ResponseBuilder::ok()
                .body(content_types::PAIRING_TLV8, body)
                .encode(),
            secure,
        }
    }

    /// Re-assert status flags and fire the update callback
    pub(crate) fn config_updated(&mut self) {
        let paired = !self.pairings.is_empty();
        if self.config.sync_paired_flag(paired) {
            info!(paired, "status flags changed");
        }
        if let Some(mut callback) = self.update_callback.take() {
            callback(&self.config);
            self.update_callback = Some(callback);
        }
    }
}
