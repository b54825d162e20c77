use std::io;
use thiserror::Error;

use crate::http::ParseError;
use crate::protocol::crypto::CryptoError;
use crate::protocol::tlv::TlvError;

/// Errors that can occur while running the accessory server
#[derive(Debug, Error)]
pub enum HapError {
    /// TLV8 encoding or decoding failed
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// A cryptographic primitive failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// HTTP request parsing failed
    #[error("HTTP parse error: {0}")]
    Http(#[from] ParseError),

    /// Secured record framing or AEAD verification failed
    #[error("record layer error: {message}")]
    Record {
        /// Description of the failure
        message: String,
    },

    /// JSON encoding/decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// All session slots are in use
    #[error("no free session slot")]
    NoFreeSession,

    /// Operation referenced a session that is not open
    #[error("session {sid} is not open")]
    SessionClosed {
        /// The offending session id
        sid: u8,
    },

    /// The pairings store is at capacity
    #[error("pairings store full")]
    MaxPeers,

    /// Persisted state could not be restored
    #[error("restore failed: {message}")]
    Restore {
        /// Description of the failure
        message: String,
    },

    /// Transport I/O error surfaced through a recv/send callback
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Result type alias for accessory-server operations
pub type Result<T> = std::result::Result<T, HapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HapError::SessionClosed { sid: 3 };
        assert_eq!(err.to_string(), "session 3 is not open");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: HapError = io_err.into();
        assert!(matches!(err, HapError::Transport(_)));
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HapError>();
    }
}
