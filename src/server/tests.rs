//! End-to-end dispatcher scenarios over an in-memory transport
//!
//! A test controller built from the crate's own primitives performs the
//! real Pair-Setup and Pair-Verify exchanges against the server, then
//! drives the secured surfaces through the record layer.

use std::cell::Cell;
use std::rc::Rc;

use super::*;
use crate::config::status_flags;
use crate::db::{Accessory, AccessoryDatabase, Service};
use crate::pairings::Permission;
use crate::protocol::crypto::test_client::SrpClient;
use crate::protocol::crypto::{
    derive_key, verify_signature, AeadCipher, EphemeralKeys, LongTermKeys, Nonce, SrpParams,
};
use crate::protocol::tlv::{errors, methods, states, TlvDecoder, TlvEncoder, TlvType};

const SETUP_CODE: &str = "031-45-154";

/// Instance id of the lightbulb On characteristic in `test_server`'s DB
const ON_IID: u64 = 9;

fn test_server() -> Server<AccessoryDatabase> {
    let mut db = AccessoryDatabase::new();
    db.add_accessory(
        Accessory::new(1)
            .with_service(Service::accessory_information(
                "Light", "Maker", "M1", "0001", "0.1",
            ))
            .with_service(
                Service::lightbulb("Light-1")
                    .with_characteristic(Service::brightness())
                    .primary(),
            ),
    );
    let config = AccessoryConfig::builder("Light")
        .setup_code(SETUP_CODE)
        .build();
    Server::new(config, db)
}

struct TestController {
    id: Vec<u8>,
    keys: LongTermKeys,
}

impl TestController {
    fn new(id: &str) -> Self {
        Self {
            id: id.as_bytes().to_vec(),
            keys: LongTermKeys::generate(),
        }
    }
}

// === transport helpers ===

/// Drive one request through `process`; returns (kept-alive, raw output)
fn try_exchange(
    server: &mut Server<AccessoryDatabase>,
    sid: Sid,
    request: &[u8],
) -> (bool, Vec<u8>) {
    let input = request.to_vec();
    let mut consumed = 0usize;
    let mut output = Vec::new();
    let ok = server.process(
        sid,
        |buf: &mut [u8]| {
            let n = (input.len() - consumed).min(buf.len());
            buf[..n].copy_from_slice(&input[consumed..consumed + n]);
            consumed += n;
            Ok(n)
        },
        |bytes: &[u8]| {
            output.extend_from_slice(bytes);
            Ok(())
        },
    );
    (ok, output)
}

fn exchange(server: &mut Server<AccessoryDatabase>, sid: Sid, request: &[u8]) -> Vec<u8> {
    let (ok, output) = try_exchange(server, sid, request);
    assert!(ok, "process() closed the session");
    output
}

fn post_tlv(path: &str, tlv: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "POST {path} HTTP/1.1\r\nContent-Type: application/pairing+tlv8\r\nContent-Length: {}\r\n\r\n",
        tlv.len()
    )
    .into_bytes();
    out.extend_from_slice(tlv);
    out
}

fn status_line(raw: &[u8]) -> String {
    let end = raw
        .windows(2)
        .position(|w| w == b"\r\n")
        .expect("status line");
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn body_of(raw: &[u8]) -> Vec<u8> {
    let pos = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("complete head")
        + 4;
    raw[pos..].to_vec()
}

fn response_tlv(raw: &[u8]) -> TlvDecoder {
    assert!(status_line(raw).starts_with("HTTP/1.1 200"));
    TlvDecoder::decode(&body_of(raw)).expect("TLV response body")
}

/// Walk raw TLV items without fragment merging (list responses repeat types)
fn raw_items(data: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut items = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let t = data[pos];
        let len = data[pos + 1] as usize;
        items.push((t, data[pos + 2..pos + 2 + len].to_vec()));
        pos += 2 + len;
    }
    items
}

// === pairing client ===

#[derive(Debug)]
struct SetupKeys {
    shared: [u8; 64],
    cipher: AeadCipher,
}

/// M1 + M3 with the given setup code; returns the M5 material
fn setup_through_m4(
    server: &mut Server<AccessoryDatabase>,
    sid: Sid,
    code: &str,
) -> std::result::Result<SetupKeys, u8> {
    let m1 = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::PAIR_SETUP_NON_MFI)
        .build();
    let m2 = response_tlv(&exchange(server, sid, &post_tlv("/pair-setup", &m1)));
    if let Some(err) = m2.get_error() {
        return Err(err);
    }
    assert_eq!(m2.get_state(), Some(states::M2));
    let salt = m2.get_exact(TlvType::Salt, 16).unwrap().to_vec();
    let server_public = m2.get(TlvType::PublicKey).unwrap().to_vec();
    assert_eq!(server_public.len(), 384);

    let srp = SrpClient::new(&SrpParams::HAP);
    let (shared, proof) = srp.process_challenge(
        b"Pair-Setup",
        code.as_bytes(),
        &salt,
        &server_public,
    );

    let m3 = TlvEncoder::new()
        .add_state(states::M3)
        .add(TlvType::PublicKey, srp.public_key())
        .add(TlvType::Proof, &proof)
        .build();
    let m4 = response_tlv(&exchange(server, sid, &post_tlv("/pair-setup", &m3)));
    if let Some(err) = m4.get_error() {
        return Err(err);
    }
    assert_eq!(m4.get_state(), Some(states::M4));
    let server_proof = m4.get_exact(TlvType::Proof, 64).unwrap();
    assert_eq!(
        server_proof,
        &srp.expected_server_proof(&shared, &proof)[..]
    );

    let session_key =
        derive_key(b"Pair-Setup-Encrypt-Salt", &shared, b"Pair-Setup-Encrypt-Info").unwrap();
    Ok(SetupKeys {
        shared,
        cipher: AeadCipher::new(&session_key).unwrap(),
    })
}

/// M5 with a chosen signing key (forged when it differs from the
/// controller identity)
fn finish_setup(
    server: &mut Server<AccessoryDatabase>,
    sid: Sid,
    keys: &SetupKeys,
    controller: &TestController,
    signer: &LongTermKeys,
) -> std::result::Result<(), u8> {
    let device_x = derive_key(
        b"Pair-Setup-Controller-Sign-Salt",
        &keys.shared,
        b"Pair-Setup-Controller-Sign-Info",
    )
    .unwrap();
    let mut info = device_x.to_vec();
    info.extend_from_slice(&controller.id);
    info.extend_from_slice(&controller.keys.public_bytes());
    let signature = signer.sign(&info);

    let sub = TlvEncoder::new()
        .add(TlvType::Identifier, &controller.id)
        .add(TlvType::PublicKey, &controller.keys.public_bytes())
        .add(TlvType::Signature, &signature)
        .build();
    let encrypted = keys
        .cipher
        .seal(&Nonce::from_label(b"PS-Msg05"), b"", &sub)
        .unwrap();
    let m5 = TlvEncoder::new()
        .add_state(states::M5)
        .add(TlvType::EncryptedData, &encrypted)
        .build();
    let m6 = response_tlv(&exchange(server, sid, &post_tlv("/pair-setup", &m5)));
    if let Some(code) = m6.get_error() {
        return Err(code);
    }
    assert_eq!(m6.get_state(), Some(states::M6));

    // check the accessory's signed identity in the M6 payload
    let encrypted = m6.get(TlvType::EncryptedData).unwrap();
    let sub = keys
        .cipher
        .open(&Nonce::from_label(b"PS-Msg06"), b"", encrypted)
        .unwrap();
    let sub = TlvDecoder::decode(&sub).unwrap();
    let accessory_id = sub.get_required(TlvType::Identifier).unwrap();
    let accessory_ltpk = sub.get_exact(TlvType::PublicKey, 32).unwrap();
    let accessory_sig = sub.get_exact(TlvType::Signature, 64).unwrap();

    let accessory_x = derive_key(
        b"Pair-Setup-Accessory-Sign-Salt",
        &keys.shared,
        b"Pair-Setup-Accessory-Sign-Info",
    )
    .unwrap();
    let mut accessory_info = accessory_x.to_vec();
    accessory_info.extend_from_slice(accessory_id);
    accessory_info.extend_from_slice(accessory_ltpk);
    verify_signature(accessory_ltpk, &accessory_info, accessory_sig).unwrap();
    Ok(())
}

fn run_pair_setup(
    server: &mut Server<AccessoryDatabase>,
    sid: Sid,
    controller: &TestController,
    code: &str,
) -> std::result::Result<(), u8> {
    let keys = setup_through_m4(server, sid, code)?;
    finish_setup(server, sid, &keys, controller, &controller.keys)
}

/// Full Pair-Verify; on success returns the controller-side record channel
fn run_pair_verify(
    server: &mut Server<AccessoryDatabase>,
    sid: Sid,
    controller: &TestController,
) -> std::result::Result<SecureChannel, u8> {
    let ephemeral = EphemeralKeys::generate();
    let m1 = TlvEncoder::new()
        .add_state(states::M1)
        .add(TlvType::PublicKey, &ephemeral.public_bytes())
        .build();
    let m2 = response_tlv(&exchange(server, sid, &post_tlv("/pair-verify", &m1)));
    if let Some(code) = m2.get_error() {
        return Err(code);
    }
    let accessory_public = m2.get_exact(TlvType::PublicKey, 32).unwrap().to_vec();

    let shared = ephemeral.shared_secret(&accessory_public).unwrap();
    let session_key = derive_key(
        b"Pair-Verify-Encrypt-Salt",
        shared.as_bytes(),
        b"Pair-Verify-Encrypt-Info",
    )
    .unwrap();
    let cipher = AeadCipher::new(&session_key).unwrap();

    // accessory proves its identity in the M2 payload
    let encrypted = m2.get(TlvType::EncryptedData).unwrap();
    let sub = cipher
        .open(&Nonce::from_label(b"PV-Msg02"), b"", encrypted)
        .unwrap();
    let sub = TlvDecoder::decode(&sub).unwrap();
    let accessory_id = sub.get_required(TlvType::Identifier).unwrap();
    let accessory_sig = sub.get_exact(TlvType::Signature, 64).unwrap();
    let mut info = accessory_public.clone();
    info.extend_from_slice(accessory_id);
    info.extend_from_slice(&ephemeral.public_bytes());
    verify_signature(&server.accessory_ltpk(), &info, accessory_sig).unwrap();

    let mut my_info = ephemeral.public_bytes().to_vec();
    my_info.extend_from_slice(&controller.id);
    my_info.extend_from_slice(&accessory_public);
    let signature = controller.keys.sign(&my_info);
    let sub = TlvEncoder::new()
        .add(TlvType::Identifier, &controller.id)
        .add(TlvType::Signature, &signature)
        .build();
    let encrypted = cipher
        .seal(&Nonce::from_label(b"PV-Msg03"), b"", &sub)
        .unwrap();
    let m3 = TlvEncoder::new()
        .add_state(states::M3)
        .add(TlvType::EncryptedData, &encrypted)
        .build();
    let m4 = response_tlv(&exchange(server, sid, &post_tlv("/pair-verify", &m3)));
    if let Some(code) = m4.get_error() {
        return Err(code);
    }
    assert_eq!(m4.get_state(), Some(states::M4));

    let c2a = derive_key(
        b"Control-Salt",
        shared.as_bytes(),
        b"Control-Write-Encryption-Key",
    )
    .unwrap();
    let a2c = derive_key(
        b"Control-Salt",
        shared.as_bytes(),
        b"Control-Read-Encryption-Key",
    )
    .unwrap();
    Ok(SecureChannel::new(&c2a, &a2c).unwrap())
}

/// Pair on one session, verify on another; returns the secured session
fn pair_and_secure(
    server: &mut Server<AccessoryDatabase>,
) -> (Sid, TestController, SecureChannel) {
    let controller = TestController::new("ios-admin");
    let setup_sid = server.open().unwrap();
    run_pair_setup(server, setup_sid, &controller, SETUP_CODE).unwrap();
    server.close(setup_sid);

    let sid = server.open().unwrap();
    let channel = run_pair_verify(server, sid, &controller).unwrap();
    (sid, controller, channel)
}

fn secured_exchange(
    server: &mut Server<AccessoryDatabase>,
    sid: Sid,
    client: &mut SecureChannel,
    request: &[u8],
) -> Vec<u8> {
    let wire = client.seal_frames(request).unwrap().concat();
    let raw = exchange(server, sid, &wire);
    client.feed(&raw);
    let mut plaintext = Vec::new();
    while let Some(block) = client.read_frame().unwrap() {
        plaintext.extend_from_slice(&block);
    }
    plaintext
}

// === scenarios ===

#[test]
fn test_unpaired_identify() {
    let mut server = test_server();
    let sid = server.open().unwrap();
    let raw = exchange(&mut server, sid, b"POST /identify HTTP/1.1\r\n\r\n");
    assert_eq!(status_line(&raw), "HTTP/1.1 204 No Content");
    assert!(body_of(&raw).is_empty());
}

#[test]
fn test_identify_locked_while_paired() {
    let mut server = test_server();
    server
        .pairings_mut()
        .add(b"ios-1", &[7u8; 32], Permission::Admin)
        .unwrap();

    let sid = server.open().unwrap();
    let raw = exchange(&mut server, sid, b"POST /identify HTTP/1.1\r\n\r\n");
    assert_eq!(status_line(&raw), "HTTP/1.1 400 Bad Request");
    assert_eq!(body_of(&raw), br#"{"status":-70401}"#);
}

#[test]
fn test_pair_setup_m1_challenge() {
    let mut server = test_server();
    let sid = server.open().unwrap();

    let m1 = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::PAIR_SETUP_NON_MFI)
        .build();
    let m2 = response_tlv(&exchange(&mut server, sid, &post_tlv("/pair-setup", &m1)));

    assert_eq!(m2.get_state(), Some(states::M2));
    assert_eq!(m2.get_error(), None);
    assert_eq!(m2.get(TlvType::PublicKey).unwrap().len(), 384);
    assert_eq!(m2.get(TlvType::Salt).unwrap().len(), 16);
}

#[test]
fn test_pair_setup_busy_for_second_session() {
    let mut server = test_server();
    let first = server.open().unwrap();
    let second = server.open().unwrap();

    let m1 = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::PAIR_SETUP_NON_MFI)
        .build();

    let reply = response_tlv(&exchange(&mut server, first, &post_tlv("/pair-setup", &m1)));
    assert_eq!(reply.get_error(), None);

    let reply = response_tlv(&exchange(&mut server, second, &post_tlv("/pair-setup", &m1)));
    assert_eq!(reply.get_state(), Some(states::M2));
    assert_eq!(reply.get_error(), Some(errors::BUSY));
}

#[test]
fn test_closing_owner_releases_singleton() {
    let mut server = test_server();
    let first = server.open().unwrap();
    let second = server.open().unwrap();

    let m1 = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::PAIR_SETUP_NON_MFI)
        .build();
    exchange(&mut server, first, &post_tlv("/pair-setup", &m1));
    assert!(server.pair_setup.is_some());

    server.close(first);
    assert!(server.pair_setup.is_none());

    let reply = response_tlv(&exchange(&mut server, second, &post_tlv("/pair-setup", &m1)));
    assert_eq!(reply.get_error(), None);
}

#[test]
fn test_auth_attempt_cap() {
    let mut server = test_server();
    let sid = server.open().unwrap();
    server.auth_attempts = MAX_AUTH_ATTEMPTS;

    let m1 = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::PAIR_SETUP_NON_MFI)
        .build();

    // attempt 101 is still admitted, the next one is refused
    let reply = response_tlv(&exchange(&mut server, sid, &post_tlv("/pair-setup", &m1)));
    assert_eq!(reply.get_error(), None);

    let reply = response_tlv(&exchange(&mut server, sid, &post_tlv("/pair-setup", &m1)));
    assert_eq!(reply.get_error(), Some(errors::MAX_TRIES));
}

#[test]
fn test_pair_setup_m3_without_m1() {
    let mut server = test_server();
    let sid = server.open().unwrap();

    let m3 = TlvEncoder::new()
        .add_state(states::M3)
        .add(TlvType::PublicKey, &[1u8; 384])
        .add(TlvType::Proof, &[2u8; 64])
        .build();
    let reply = response_tlv(&exchange(&mut server, sid, &post_tlv("/pair-setup", &m3)));
    assert_eq!(reply.get_state(), Some(states::M4));
    assert_eq!(reply.get_error(), Some(errors::UNKNOWN));
}

#[test]
fn test_full_pairing_and_update_callback() {
    let mut server = test_server();
    let updates = Rc::new(Cell::new(0));
    let seen = updates.clone();
    server.on_update(move |config| {
        assert_eq!(config.status_flags & status_flags::NOT_PAIRED, 0);
        seen.set(seen.get() + 1);
    });

    let controller = TestController::new("ios-admin");
    let sid = server.open().unwrap();
    run_pair_setup(&mut server, sid, &controller, SETUP_CODE).unwrap();

    assert_eq!(server.pairings().len(), 1);
    assert_eq!(updates.get(), 1);
    assert!(server.pair_setup.is_none());
    assert_eq!(
        server.config().status_flags & status_flags::NOT_PAIRED,
        0
    );
}

#[test]
fn test_wrong_setup_code_keeps_exchange_open() {
    let mut server = test_server();
    let sid = server.open().unwrap();

    let err = setup_through_m4(&mut server, sid, "999-99-999").unwrap_err();
    assert_eq!(err, errors::AUTHENTICATION);

    // the singleton survives an authentication failure; only the M1
    // attempt counter throttles retries
    assert!(server.pair_setup.is_some());
    let controller = TestController::new("ios-admin");
    run_pair_setup(&mut server, sid, &controller, SETUP_CODE).unwrap();
}

#[test]
fn test_forged_m5_signature_rejected() {
    let mut server = test_server();
    let sid = server.open().unwrap();
    let controller = TestController::new("ios-admin");
    let forger = LongTermKeys::generate();

    let keys = setup_through_m4(&mut server, sid, SETUP_CODE).unwrap();
    let err = finish_setup(&mut server, sid, &keys, &controller, &forger).unwrap_err();
    assert_eq!(err, errors::AUTHENTICATION);
    assert!(server.pairings().is_empty());
}

#[test]
fn test_pair_verify_unknown_controller() {
    let mut server = test_server();
    let (_, _, _) = pair_and_secure(&mut server);

    let stranger = TestController::new("ios-stranger");
    let sid = server.open().unwrap();
    let err = run_pair_verify(&mut server, sid, &stranger).unwrap_err();
    assert_eq!(err, errors::AUTHENTICATION);
}

#[test]
fn test_pair_verify_wrong_signature_rejected() {
    let mut server = test_server();
    let controller = TestController::new("ios-admin");
    let setup_sid = server.open().unwrap();
    run_pair_setup(&mut server, setup_sid, &controller, SETUP_CODE).unwrap();

    // right identifier, wrong long-term key
    let imposter = TestController {
        id: controller.id.clone(),
        keys: LongTermKeys::generate(),
    };
    let sid = server.open().unwrap();
    let err = run_pair_verify(&mut server, sid, &imposter).unwrap_err();
    assert_eq!(err, errors::AUTHENTICATION);
}

#[test]
fn test_secured_get_accessories() {
    let mut server = test_server();
    let (sid, _, mut channel) = pair_and_secure(&mut server);

    let response = secured_exchange(
        &mut server,
        sid,
        &mut channel,
        b"GET /accessories HTTP/1.1\r\n\r\n",
    );
    assert!(status_line(&response).starts_with("HTTP/1.1 200"));

    let tree: serde_json::Value = serde_json::from_slice(&body_of(&response)).unwrap();
    assert_eq!(tree["accessories"][0]["aid"], 1);
}

#[test]
fn test_plaintext_after_verify_drops_session() {
    let mut server = test_server();
    let (sid, _, _) = pair_and_secure(&mut server);

    // S4: the next inbound bytes must be a record; raw HTTP reads as an
    // oversized frame
    let (ok, _) = try_exchange(&mut server, sid, b"GET /accessories HTTP/1.1\r\n\r\n");
    assert!(!ok);
}

#[test]
fn test_secured_request_must_fit_one_record() {
    let mut server = test_server();
    let (sid, _, mut channel) = pair_and_secure(&mut server);

    let body = format!(
        r#"{{"characteristics":[{{"aid":1,"iid":{ON_IID},"value":true,"ev":{}}}]}}"#,
        "a".repeat(1200)
    );
    let request = format!(
        "PUT /characteristics HTTP/1.1\r\nContent-Type: application/hap+json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let wire = channel.seal_frames(request.as_bytes()).unwrap().concat();
    let (ok, _) = try_exchange(&mut server, sid, &wire);
    assert!(!ok);
}

#[test]
fn test_subscribe_and_event_delivery() {
    let mut server = test_server();
    let (sid, _, mut channel) = pair_and_secure(&mut server);

    // S5: subscribe to the lightbulb On characteristic
    let body = format!(r#"{{"characteristics":[{{"aid":1,"iid":{ON_IID},"ev":true}}]}}"#);
    let request = format!(
        "PUT /characteristics HTTP/1.1\r\nContent-Type: application/hap+json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let response = secured_exchange(&mut server, sid, &mut channel, request.as_bytes());
    assert_eq!(status_line(&response), "HTTP/1.1 204 No Content");

    // external value change -> EVENT/1.0 on the next poll
    server
        .db_mut()
        .set_value(1, ON_IID, &serde_json::json!(true))
        .unwrap();

    let mut raw = Vec::new();
    assert!(server.poll(sid, |bytes: &[u8]| {
        raw.extend_from_slice(bytes);
        Ok(())
    }));
    channel.feed(&raw);
    let mut event = Vec::new();
    while let Some(block) = channel.read_frame().unwrap() {
        event.extend_from_slice(&block);
    }
    assert!(status_line(&event).starts_with("EVENT/1.0 200"));
    let json: serde_json::Value = serde_json::from_slice(&body_of(&event)).unwrap();
    assert_eq!(json["characteristics"][0]["iid"], ON_IID);
    assert_eq!(json["characteristics"][0]["value"], true);

    // drained exactly once: the next poll transmits nothing
    let mut again = Vec::new();
    assert!(server.poll(sid, |bytes: &[u8]| {
        again.extend_from_slice(bytes);
        Ok(())
    }));
    assert!(again.is_empty());
}

#[test]
fn test_read_characteristics_secured() {
    let mut server = test_server();
    let (sid, _, mut channel) = pair_and_secure(&mut server);

    let request = format!("GET /characteristics?id=1.{ON_IID} HTTP/1.1\r\n\r\n");
    let response = secured_exchange(&mut server, sid, &mut channel, request.as_bytes());
    assert!(status_line(&response).starts_with("HTTP/1.1 200"));
    let json: serde_json::Value = serde_json::from_slice(&body_of(&response)).unwrap();
    assert_eq!(json["characteristics"][0]["value"], false);
}

#[test]
fn test_unsecured_access_requires_authorization() {
    let mut server = test_server();
    let sid = server.open().unwrap();

    for request in [
        &b"GET /accessories HTTP/1.1\r\n\r\n"[..],
        &b"GET /characteristics?id=1.9 HTTP/1.1\r\n\r\n"[..],
        &post_tlv("/pairings", &TlvEncoder::new().add_state(states::M1).build())[..],
        &b"PUT /characteristics HTTP/1.1\r\nContent-Type: application/hap+json\r\nContent-Length: 2\r\n\r\n{}"[..],
    ] {
        let raw = exchange(&mut server, sid, request);
        assert!(
            status_line(&raw).starts_with("HTTP/1.1 470"),
            "expected 470 for {}",
            String::from_utf8_lossy(request)
        );
    }
}

#[test]
fn test_unknown_path_and_method() {
    let mut server = test_server();
    let sid = server.open().unwrap();

    let raw = exchange(&mut server, sid, b"POST /nonsense HTTP/1.1\r\n\r\n");
    assert!(status_line(&raw).starts_with("HTTP/1.1 400"));

    // unsupported verb is a parse error: fatal
    let (ok, _) = try_exchange(&mut server, sid, b"DELETE /pairings HTTP/1.1\r\n\r\n");
    assert!(!ok);
}

#[test]
fn test_add_pairing_and_admin_gate() {
    let mut server = test_server();
    let (admin_sid, _, mut admin_channel) = pair_and_secure(&mut server);

    // admin registers a regular controller
    let regular = TestController::new("ios-regular");
    let add = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::ADD_PAIRING)
        .add(TlvType::Identifier, &regular.id)
        .add(TlvType::PublicKey, &regular.keys.public_bytes())
        .add_u8(TlvType::Permissions, Permission::Regular as u8)
        .build();
    let response = secured_exchange(
        &mut server,
        admin_sid,
        &mut admin_channel,
        &post_tlv("/pairings", &add),
    );
    let reply = response_tlv(&response);
    assert_eq!(reply.get_error(), None);
    assert_eq!(server.pairings().len(), 2);

    // the regular controller can verify a session but not manage pairings
    let regular_sid = server.open().unwrap();
    let mut regular_channel = run_pair_verify(&mut server, regular_sid, &regular).unwrap();

    let list = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::LIST_PAIRINGS)
        .build();
    let response = secured_exchange(
        &mut server,
        regular_sid,
        &mut regular_channel,
        &post_tlv("/pairings", &list),
    );
    let reply = response_tlv(&response);
    assert_eq!(reply.get_error(), Some(errors::AUTHENTICATION));
}

#[test]
fn test_add_pairing_ltpk_mismatch() {
    let mut server = test_server();
    let (admin_sid, admin, mut channel) = pair_and_secure(&mut server);

    // re-register the admin identifier with a different LTPK
    let add = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::ADD_PAIRING)
        .add(TlvType::Identifier, &admin.id)
        .add(TlvType::PublicKey, &[9u8; 32])
        .add_u8(TlvType::Permissions, Permission::Admin as u8)
        .build();
    let response = secured_exchange(
        &mut server,
        admin_sid,
        &mut channel,
        &post_tlv("/pairings", &add),
    );
    assert_eq!(response_tlv(&response).get_error(), Some(errors::UNKNOWN));
}

#[test]
fn test_pairings_capacity_via_handler() {
    let mut server = test_server();
    let (admin_sid, _, mut channel) = pair_and_secure(&mut server);

    // the admin record occupies one slot; nine more fill the store
    for i in 0..9 {
        let add = TlvEncoder::new()
            .add_state(states::M1)
            .add_u8(TlvType::Method, methods::ADD_PAIRING)
            .add(TlvType::Identifier, format!("ios-extra-{i}").as_bytes())
            .add(TlvType::PublicKey, &[i as u8 + 1; 32])
            .add_u8(TlvType::Permissions, Permission::Regular as u8)
            .build();
        let response = secured_exchange(
            &mut server,
            admin_sid,
            &mut channel,
            &post_tlv("/pairings", &add),
        );
        assert_eq!(response_tlv(&response).get_error(), None, "slot {i}");
    }

    let add = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::ADD_PAIRING)
        .add(TlvType::Identifier, b"ios-overflow")
        .add(TlvType::PublicKey, &[0x77u8; 32])
        .add_u8(TlvType::Permissions, Permission::Regular as u8)
        .build();
    let response = secured_exchange(
        &mut server,
        admin_sid,
        &mut channel,
        &post_tlv("/pairings", &add),
    );
    assert_eq!(response_tlv(&response).get_error(), Some(errors::MAX_PEERS));
}

#[test]
fn test_list_pairings_groups() {
    let mut server = test_server();
    let (admin_sid, admin, mut channel) = pair_and_secure(&mut server);
    server
        .pairings_mut()
        .add(b"ios-second", &[3u8; 32], Permission::Regular)
        .unwrap();

    let list = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::LIST_PAIRINGS)
        .build();
    let response = secured_exchange(
        &mut server,
        admin_sid,
        &mut channel,
        &post_tlv("/pairings", &list),
    );
    assert!(status_line(&response).starts_with("HTTP/1.1 200"));

    let items = raw_items(&body_of(&response));
    // State, then two (Identifier, PublicKey, Permissions) groups split by
    // one zero-length Separator
    let separators: Vec<_> = items
        .iter()
        .filter(|(t, v)| *t == TlvType::Separator as u8 && v.is_empty())
        .collect();
    assert_eq!(separators.len(), 1);

    let identifiers: Vec<_> = items
        .iter()
        .filter(|(t, _)| *t == TlvType::Identifier as u8)
        .map(|(_, v)| v.clone())
        .collect();
    assert_eq!(identifiers, vec![admin.id.clone(), b"ios-second".to_vec()]);
}

#[test]
fn test_remove_pairing_closes_bound_sessions() {
    let mut server = test_server();
    let updates = Rc::new(Cell::new(0));
    let seen = updates.clone();
    server.on_update(move |_| seen.set(seen.get() + 1));

    let (admin_sid, admin, mut channel) = pair_and_secure(&mut server);

    // S6: the admin removes its own pairing
    let remove = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::REMOVE_PAIRING)
        .add(TlvType::Identifier, &admin.id)
        .build();
    let response = secured_exchange(
        &mut server,
        admin_sid,
        &mut channel,
        &post_tlv("/pairings", &remove),
    );
    assert_eq!(response_tlv(&response).get_error(), None);

    assert!(server.pairings().is_empty());
    assert_eq!(server.take_pending_closures(), vec![admin_sid]);
    assert!(server.take_pending_closures().is_empty());
    assert_ne!(
        server.config().status_flags & status_flags::NOT_PAIRED,
        0
    );
    assert!(updates.get() >= 1);
}

#[test]
fn test_remove_unknown_pairing() {
    let mut server = test_server();
    let (admin_sid, _, mut channel) = pair_and_secure(&mut server);

    let remove = TlvEncoder::new()
        .add_state(states::M1)
        .add_u8(TlvType::Method, methods::REMOVE_PAIRING)
        .add(TlvType::Identifier, b"ios-missing")
        .build();
    let response = secured_exchange(
        &mut server,
        admin_sid,
        &mut channel,
        &post_tlv("/pairings", &remove),
    );
    assert_eq!(response_tlv(&response).get_error(), Some(errors::UNKNOWN));
}

#[test]
fn test_snapshot_restore_preserves_pairing() {
    let mut server = test_server();
    let controller = TestController::new("ios-admin");
    let sid = server.open().unwrap();
    run_pair_setup(&mut server, sid, &controller, SETUP_CODE).unwrap();

    let snapshot = server.snapshot();
    assert_eq!(snapshot.pairings.len(), 1);

    let mut db = AccessoryDatabase::new();
    db.add_accessory(
        Accessory::new(1).with_service(Service::accessory_information(
            "Light", "Maker", "M1", "0001", "0.1",
        )),
    );
    let mut restored = Server::restore(&snapshot, db).unwrap();
    assert_eq!(restored.accessory_ltpk(), server.accessory_ltpk());
    assert_eq!(
        restored.config().status_flags & status_flags::NOT_PAIRED,
        0
    );

    // the old controller can re-establish a session against the restored
    // server without pairing again
    let sid = restored.open().unwrap();
    run_pair_verify(&mut restored, sid, &controller).unwrap();
}

#[test]
fn test_session_slots_exhaust_and_recycle() {
    let mut server = test_server();
    let mut sids = Vec::new();
    for _ in 0..MAX_SESSIONS {
        sids.push(server.open().unwrap());
    }
    assert!(server.open().is_none());

    server.close(sids[3]);
    assert_eq!(server.open(), Some(sids[3]));
}

#[test]
fn test_factory_reset() {
    let mut server = test_server();
    let controller = TestController::new("ios-admin");
    let sid = server.open().unwrap();
    run_pair_setup(&mut server, sid, &controller, SETUP_CODE).unwrap();

    let old_device_id = server.config().device_id.clone();
    let old_ltpk = server.accessory_ltpk();

    server.factory_reset();
    assert!(server.pairings().is_empty());
    assert_ne!(server.config().device_id, old_device_id);
    assert_ne!(server.accessory_ltpk(), old_ltpk);
    assert_ne!(
        server.config().status_flags & status_flags::NOT_PAIRED,
        0
    );
}

#[test]
fn test_pair_setup_bad_content_type() {
    let mut server = test_server();
    let sid = server.open().unwrap();

    let tlv = TlvEncoder::new().add_state(states::M1).build();
    let mut raw = format!(
        "POST /pair-setup HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
        tlv.len()
    )
    .into_bytes();
    raw.extend_from_slice(&tlv);

    let response = exchange(&mut server, sid, &raw);
    assert!(status_line(&response).starts_with("HTTP/1.1 400"));
}
