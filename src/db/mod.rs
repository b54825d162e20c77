//! Attribute database: accessories, services, characteristics
//!
//! The dispatcher only depends on the [`AttributeDb`] contract; the
//! shipped [`AccessoryDatabase`] implements it for in-memory accessory
//! trees built from [`Service`] and [`Characteristic`] slots.

mod characteristic;
mod database;
mod service;

pub use self::characteristic::{perms, Characteristic, Format, Value};
pub use self::database::{Accessory, AccessoryDatabase};
pub use self::service::{types, Service};

use crate::http::StatusCode;
use crate::server::Sid;

/// Accessory id
pub type Aid = u64;

/// Characteristic/service instance id, unique within an accessory
pub type Iid = u64;

/// Per-characteristic HAP status sub-codes
pub mod status {
    /// Success
    pub const SUCCESS: i32 = 0;
    /// Request denied due to insufficient privileges
    pub const INSUFFICIENT_PRIVILEGES: i32 = -70401;
    /// Unable to communicate with the service
    pub const SERVICE_COMMUNICATION_FAILURE: i32 = -70402;
    /// Resource is busy
    pub const RESOURCE_BUSY: i32 = -70403;
    /// Cannot write to a read-only characteristic
    pub const READ_ONLY: i32 = -70404;
    /// Cannot read from a write-only characteristic
    pub const WRITE_ONLY: i32 = -70405;
    /// Notification not supported for this characteristic
    pub const NOTIFICATION_NOT_SUPPORTED: i32 = -70406;
    /// Out of resources
    pub const OUT_OF_RESOURCES: i32 = -70407;
    /// Operation timed out
    pub const TIMED_OUT: i32 = -70408;
    /// Resource does not exist
    pub const RESOURCE_NOT_FOUND: i32 = -70409;
    /// Invalid value received
    pub const INVALID_VALUE: i32 = -70410;
    /// Insufficient authorization
    pub const INSUFFICIENT_AUTHORIZATION: i32 = -70411;
}

/// The attribute-database contract the dispatcher consumes
///
/// All operations are keyed by the calling session id: event subscriptions
/// and pending notifications are per-session state.
pub trait AttributeDb {
    /// A session opened; prepare per-session state
    fn open(&mut self, sid: Sid);

    /// A session closed; detach its subscriptions and pending events
    fn close(&mut self, sid: Sid);

    /// Serialize the whole accessory tree for `GET /accessories`
    fn get_db(&mut self, sid: Sid) -> String;

    /// `GET /characteristics` — `query` is the raw query string
    fn read(&mut self, sid: Sid, query: &str) -> (StatusCode, Option<String>);

    /// `PUT /characteristics` — `body` is the JSON request body
    fn write(&mut self, sid: Sid, body: &[u8]) -> (StatusCode, Option<String>);

    /// Drain pending events for the session; `None` suppresses transmission
    fn get_events(&mut self, sid: Sid) -> Option<String>;
}
