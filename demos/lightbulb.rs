//! Two-lightbulb demo accessory with a minimal polling TCP driver.
//!
//! Run with `cargo run --example lightbulb`, then pair from the Home app
//! using the printed setup code (an external mDNS advertiser is still
//! needed for discovery). State persists to `lightbulb.hap.json` in the
//! working directory.

use std::cell::Cell;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::time::Duration;

use hap_accessory::db::{Accessory, AccessoryDatabase, Service};
use hap_accessory::{discovery, AccessoryConfig, Server, Sid, Snapshot};
use tracing::{info, warn};

const STATE_FILE: &str = "lightbulb.hap.json";

fn build_db() -> AccessoryDatabase {
    let mut db = AccessoryDatabase::new();
    db.add_accessory(
        Accessory::new(1)
            .with_service(Service::accessory_information(
                "Lights", "ExampleMaker", "LB-2", "0001", "0.1",
            ))
            .with_service(
                Service::lightbulb("Light-1")
                    .with_characteristic(Service::brightness())
                    .primary(),
            )
            .with_service(Service::lightbulb("Light-2")),
    );
    db
}

fn load_or_init() -> Server<AccessoryDatabase> {
    if let Ok(raw) = std::fs::read(STATE_FILE) {
        match serde_json::from_slice::<Snapshot>(&raw) {
            Ok(snapshot) => match Server::restore(&snapshot, build_db()) {
                Ok(server) => {
                    info!("restored state from {STATE_FILE}");
                    return server;
                }
                Err(err) => warn!(%err, "state restore failed, starting fresh"),
            },
            Err(err) => warn!(%err, "state file unreadable, starting fresh"),
        }
    }

    let config = AccessoryConfig::builder("Lights")
        .model("LB-2")
        .manufacturer("ExampleMaker")
        .category(5)
        .port(7889)
        .build();
    Server::new(config, build_db())
}

fn save(snapshot: &Snapshot) {
    match serde_json::to_vec_pretty(snapshot) {
        Ok(bytes) => {
            if let Err(err) = std::fs::write(STATE_FILE, bytes) {
                warn!(%err, "cannot persist state");
            }
        }
        Err(err) => warn!(%err, "cannot serialize state"),
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut server = load_or_init();

    let dirty = Rc::new(Cell::new(false));
    let flag = dirty.clone();
    server.on_update(move |config| {
        // an mDNS advertiser would re-register here
        info!(txt = ?discovery::txt_records(config), "configuration changed");
        flag.set(true);
    });

    let port = server.config().port;
    info!(
        "accessory '{}'  device id {}  setup code {}",
        server.config().name,
        server.config().device_id,
        server.config().setup_code
    );

    let listener = TcpListener::bind(("0.0.0.0", port))?;
    listener.set_nonblocking(true)?;
    info!(port, "listening");

    let mut sockets: HashMap<Sid, TcpStream> = HashMap::new();
    loop {
        // accept new connections while session slots are free
        match listener.accept() {
            Ok((stream, peer)) => match server.open() {
                Some(sid) => {
                    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
                    info!(sid, %peer, "connection accepted");
                    sockets.insert(sid, stream);
                }
                None => {
                    warn!(%peer, "no free session, dropping connection");
                }
            },
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => return Err(err),
        }

        let mut closed: Vec<Sid> = Vec::new();
        for (&sid, stream) in &mut sockets {
            // one readiness probe per session per tick
            let mut probe = [0u8; 1];
            stream.set_nonblocking(true)?;
            let ready = match stream.peek(&mut probe) {
                Ok(0) => {
                    closed.push(sid);
                    continue;
                }
                Ok(_) => true,
                Err(err) if err.kind() == ErrorKind::WouldBlock => false,
                Err(_) => {
                    closed.push(sid);
                    continue;
                }
            };
            stream.set_nonblocking(false)?;

            if ready {
                let mut reader = stream.try_clone()?;
                let mut writer = stream.try_clone()?;
                let alive = server.process(
                    sid,
                    |buf: &mut [u8]| reader.read(buf),
                    |bytes: &[u8]| writer.write_all(bytes),
                );
                if !alive {
                    closed.push(sid);
                    continue;
                }
            }

            // out-of-band event delivery between requests
            let mut writer = stream.try_clone()?;
            if !server.poll(sid, |bytes: &[u8]| writer.write_all(bytes)) {
                closed.push(sid);
            }
        }

        // controllers whose pairing was removed lose their sessions
        closed.extend(server.take_pending_closures());
        for sid in closed {
            if sockets.remove(&sid).is_some() {
                server.close(sid);
            }
        }

        if dirty.take() {
            save(&server.snapshot());
        }

        std::thread::sleep(Duration::from_millis(20));
    }
}
