//! TLV8 encoding for the HAP pairing protocol
//!
//! Items are (type, length, value) triples with byte-sized type and length
//! fields. Values longer than 255 bytes are emitted as multiple contiguous
//! items of the same type; the decoder concatenates such fragments back
//! into one value.

use thiserror::Error;

/// Upper bound on distinct items in one incoming TLV
pub const MAX_TLV_ITEMS: usize = 10;

/// Upper bound on a single (defragmented) value
pub const MAX_TLV_VALUE: usize = 64 * 1024;

/// TLV type codes used in HAP pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    /// Pairing method
    Method = 0x00,
    /// Pairing identifier
    Identifier = 0x01,
    /// Salt for SRP
    Salt = 0x02,
    /// Public key (SRP B, Curve25519, or Ed25519 LTPK)
    PublicKey = 0x03,
    /// SRP proof
    Proof = 0x04,
    /// Encrypted data with appended auth tag
    EncryptedData = 0x05,
    /// Pairing state (M1..M6)
    State = 0x06,
    /// Error code
    Error = 0x07,
    /// Seconds to wait before retrying
    RetryDelay = 0x08,
    /// Certificate
    Certificate = 0x09,
    /// Ed25519 signature
    Signature = 0x0A,
    /// Controller permissions
    Permissions = 0x0B,
    /// Fragment data
    FragmentData = 0x0C,
    /// Last fragment
    FragmentLast = 0x0D,
    /// Zero-length item delimiting repeated groups
    Separator = 0xFF,
}

impl TlvType {
    /// Create from a raw byte value
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }
}

/// Pairing states carried in the `State` item
pub mod states {
    /// M1
    pub const M1: u8 = 0x01;
    /// M2
    pub const M2: u8 = 0x02;
    /// M3
    pub const M3: u8 = 0x03;
    /// M4
    pub const M4: u8 = 0x04;
    /// M5
    pub const M5: u8 = 0x05;
    /// M6
    pub const M6: u8 = 0x06;
}

/// Pairing methods carried in the `Method` item
pub mod methods {
    /// Pair-Setup without MFi authentication
    pub const PAIR_SETUP_NON_MFI: u8 = 0x00;
    /// Pair-Setup with MFi authentication
    pub const PAIR_SETUP_MFI: u8 = 0x01;
    /// Pair-Verify
    pub const PAIR_VERIFY: u8 = 0x02;
    /// Add pairing
    pub const ADD_PAIRING: u8 = 0x03;
    /// Remove pairing
    pub const REMOVE_PAIRING: u8 = 0x04;
    /// List pairings
    pub const LIST_PAIRINGS: u8 = 0x05;
}

/// Error codes carried in the `Error` item
pub mod errors {
    /// Generic failure
    pub const UNKNOWN: u8 = 0x01;
    /// Setup code or signature verification failed
    pub const AUTHENTICATION: u8 = 0x02;
    /// Retry later (with `RetryDelay`)
    pub const BACKOFF: u8 = 0x03;
    /// Pairings store is full
    pub const MAX_PEERS: u8 = 0x04;
    /// Too many failed authentication attempts
    pub const MAX_TRIES: u8 = 0x05;
    /// Pairing unavailable (already paired)
    pub const UNAVAILABLE: u8 = 0x06;
    /// Another controller is pairing
    pub const BUSY: u8 = 0x07;
}

/// TLV codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlvError {
    /// Input ended inside an item
    #[error("truncated TLV item")]
    Truncated,

    /// More than [`MAX_TLV_ITEMS`] distinct items
    #[error("too many TLV items")]
    TooManyItems,

    /// A defragmented value exceeded [`MAX_TLV_VALUE`]
    #[error("TLV value too long for type 0x{0:02x}")]
    ValueTooLong(u8),

    /// A type repeated non-contiguously (not a legal fragment run)
    #[error("non-contiguous repetition of type 0x{0:02x}")]
    NonContiguous(u8),

    /// A required item is missing
    #[error("missing TLV item 0x{0:02x}")]
    Missing(u8),

    /// An item had an unexpected length
    #[error("invalid length for TLV item 0x{0:02x}")]
    InvalidLength(u8),
}

/// TLV encoder
///
/// Values longer than 255 bytes are split into contiguous fragments.
#[derive(Default)]
pub struct TlvEncoder {
    buffer: Vec<u8>,
}

impl TlvEncoder {
    /// Create an empty encoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item, fragmenting as needed
    #[must_use]
    pub fn add(mut self, tlv_type: TlvType, value: &[u8]) -> Self {
        if value.is_empty() {
            self.buffer.push(tlv_type as u8);
            self.buffer.push(0);
            return self;
        }
        for chunk in value.chunks(255) {
            self.buffer.push(tlv_type as u8);
            #[allow(clippy::cast_possible_truncation)]
            self.buffer.push(chunk.len() as u8);
            self.buffer.extend_from_slice(chunk);
        }
        self
    }

    /// Append a single-byte item
    #[must_use]
    pub fn add_u8(self, tlv_type: TlvType, value: u8) -> Self {
        self.add(tlv_type, &[value])
    }

    /// Append the `State` item
    #[must_use]
    pub fn add_state(self, state: u8) -> Self {
        self.add_u8(TlvType::State, state)
    }

    /// Append the `Error` item
    #[must_use]
    pub fn add_error(self, code: u8) -> Self {
        self.add_u8(TlvType::Error, code)
    }

    /// Append a zero-length `Separator` item
    #[must_use]
    pub fn add_separator(self) -> Self {
        self.add(TlvType::Separator, &[])
    }

    /// Finish and return the encoded bytes
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

/// TLV decoder
///
/// Decoding merges contiguous same-type fragments into one value and
/// preserves item order. A type repeated after intervening items is a
/// structural error (the server never receives separator-delimited lists).
#[derive(Debug, PartialEq)]
pub struct TlvDecoder {
    items: Vec<(u8, Vec<u8>)>,
}

impl TlvDecoder {
    /// Decode a TLV byte string
    ///
    /// # Errors
    ///
    /// Returns an error when the input is truncated, holds more than
    /// [`MAX_TLV_ITEMS`] distinct items, a merged value exceeds
    /// [`MAX_TLV_VALUE`], or a type repeats non-contiguously.
    pub fn decode(data: &[u8]) -> Result<Self, TlvError> {
        let mut items: Vec<(u8, Vec<u8>)> = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            if pos + 2 > data.len() {
                return Err(TlvError::Truncated);
            }
            let tlv_type = data[pos];
            let length = data[pos + 1] as usize;
            pos += 2;

            if pos + length > data.len() {
                return Err(TlvError::Truncated);
            }
            let value = &data[pos..pos + length];
            pos += length;

            match items.last_mut() {
                // fragment continuation of the previous item
                Some((last_type, last_value)) if *last_type == tlv_type => {
                    last_value.extend_from_slice(value);
                    if last_value.len() > MAX_TLV_VALUE {
                        return Err(TlvError::ValueTooLong(tlv_type));
                    }
                }
                _ => {
                    if items.iter().any(|(t, _)| *t == tlv_type) {
                        return Err(TlvError::NonContiguous(tlv_type));
                    }
                    if items.len() == MAX_TLV_ITEMS {
                        return Err(TlvError::TooManyItems);
                    }
                    items.push((tlv_type, value.to_vec()));
                }
            }
        }

        Ok(Self { items })
    }

    /// Number of decoded items
    #[must_use]
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Get a value by type
    #[must_use]
    pub fn get(&self, tlv_type: TlvType) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == tlv_type as u8)
            .map(|(_, v)| v.as_slice())
    }

    /// Get a single-byte value
    #[must_use]
    pub fn get_u8(&self, tlv_type: TlvType) -> Option<u8> {
        match self.get(tlv_type) {
            Some([b]) => Some(*b),
            _ => None,
        }
    }

    /// Get a required value
    ///
    /// # Errors
    ///
    /// Returns [`TlvError::Missing`] when the item is absent.
    pub fn get_required(&self, tlv_type: TlvType) -> Result<&[u8], TlvError> {
        self.get(tlv_type).ok_or(TlvError::Missing(tlv_type as u8))
    }

    /// Get a required value of an exact length
    ///
    /// # Errors
    ///
    /// Returns [`TlvError::Missing`] when absent or
    /// [`TlvError::InvalidLength`] when the length differs.
    pub fn get_exact(&self, tlv_type: TlvType, len: usize) -> Result<&[u8], TlvError> {
        let value = self.get_required(tlv_type)?;
        if value.len() != len {
            return Err(TlvError::InvalidLength(tlv_type as u8));
        }
        Ok(value)
    }

    /// Get the pairing `State` item
    #[must_use]
    pub fn get_state(&self) -> Option<u8> {
        self.get_u8(TlvType::State)
    }

    /// Get the `Error` item, if present
    #[must_use]
    pub fn get_error(&self) -> Option<u8> {
        self.get_u8(TlvType::Error)
    }
}
