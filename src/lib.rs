//! # hap-accessory
//!
//! Accessory-side implementation of Apple's HomeKit Accessory Protocol
//! (HAP) over IP: SRP-6a Pair-Setup, Pair-Verify session establishment,
//! the ChaCha20-Poly1305 record layer, `/pairings` management, and the
//! attribute-database surface (`/accessories`, `/characteristics`) with
//! per-session event notifications.
//!
//! The crate is transport-agnostic: a TCP driver accepts connections,
//! allocates sessions, and drives the [`Server`] with synchronous
//! recv/send callbacks from a single dispatch thread. mDNS advertisement
//! is likewise external; [`discovery::txt_records`] supplies the TXT
//! fields and the configuration update callback signals re-registration.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hap_accessory::db::{Accessory, AccessoryDatabase, Service};
//! use hap_accessory::{AccessoryConfig, Server};
//!
//! let mut db = AccessoryDatabase::new();
//! db.add_accessory(
//!     Accessory::new(1)
//!         .with_service(Service::accessory_information(
//!             "Light", "Maker", "Model-1", "0001", "0.1",
//!         ))
//!         .with_service(Service::lightbulb("Light-1").primary()),
//! );
//!
//! let config = AccessoryConfig::builder("Light").build();
//! println!("setup code: {}", config.setup_code);
//!
//! let mut server = Server::new(config, db);
//! server.on_update(|config| {
//!     // persist a snapshot, re-advertise mDNS
//!     let _ = config;
//! });
//! // hand `server` to a TCP driver: open() per accept, process() per
//! // readable session, poll() between requests
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod discovery;
/// Error types
pub mod error;
pub mod http;
pub mod pairings;
pub mod protocol;
mod server;

pub use config::{AccessoryConfig, Snapshot};
pub use error::{HapError, Result};
pub use pairings::{Pairings, Permission};
pub use server::{ChannelError, SecureChannel, Server, Sid, MAX_BLOCK, MAX_FRAME, MAX_SESSIONS};
