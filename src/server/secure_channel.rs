//! AEAD record layer for secured sessions
//!
//! After Pair-Verify completes, every HTTP byte travels inside records of
//! the form `len_le16 || ciphertext(len) || tag(16)`. The length prefix is
//! the AAD; the nonce is four zero bytes followed by the 64-bit
//! little-endian sequence counter of the direction. Counters start at zero
//! when the session is secured and never roll back.

use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::protocol::crypto::{AeadCipher, CryptoError, Nonce};

/// Maximum plaintext bytes per record
pub const MAX_BLOCK: usize = 1024;

/// Poly1305 tag length
pub const TAG_LEN: usize = 16;

/// Length-prefix size
pub const LEN_PREFIX: usize = 2;

/// Largest wire frame: prefix + block + tag
pub const MAX_FRAME: usize = LEN_PREFIX + MAX_BLOCK + TAG_LEN;

/// Record-layer failures; every one of them closes the session
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Record advertised more than [`MAX_BLOCK`] plaintext bytes
    #[error("record too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Tag verification or decryption failed
    #[error("record authentication failed")]
    BadRecord,

    /// Cipher setup failed
    #[error("cipher error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Secured-session record channel
#[derive(Debug)]
pub struct SecureChannel {
    outbound: AeadCipher,
    inbound: AeadCipher,
    send_seq: u64,
    recv_seq: u64,
    buffer: BytesMut,
}

impl SecureChannel {
    /// Create a channel from the session transport keys
    ///
    /// `a2c_key` encrypts accessory-to-controller records, `c2a_key`
    /// decrypts controller-to-accessory records.
    ///
    /// # Errors
    ///
    /// Fails when either key is not 32 bytes.
    pub fn new(a2c_key: &[u8; 32], c2a_key: &[u8; 32]) -> Result<Self, ChannelError> {
        Ok(Self {
            outbound: AeadCipher::new(a2c_key)?,
            inbound: AeadCipher::new(c2a_key)?,
            send_seq: 0,
            recv_seq: 0,
            buffer: BytesMut::with_capacity(MAX_FRAME),
        })
    }

    /// Buffer inbound wire bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decrypt one complete record
    ///
    /// Returns `Ok(None)` until a whole frame has arrived. The receive
    /// counter advances only on successful verification.
    ///
    /// # Errors
    ///
    /// Oversized records and tag mismatches are unrecoverable.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        if self.buffer.len() < LEN_PREFIX {
            return Ok(None);
        }

        let aad = [self.buffer[0], self.buffer[1]];
        let length = usize::from(u16::from_le_bytes(aad));
        if length > MAX_BLOCK {
            return Err(ChannelError::FrameTooLarge(length));
        }
        if self.buffer.len() < LEN_PREFIX + length + TAG_LEN {
            return Ok(None);
        }

        self.buffer.advance(LEN_PREFIX);
        let ciphertext = self.buffer.split_to(length + TAG_LEN);

        let nonce = Nonce::from_counter(self.recv_seq);
        let plaintext = self
            .inbound
            .open(&nonce, &aad, &ciphertext)
            .map_err(|_| ChannelError::BadRecord)?;
        self.recv_seq += 1;

        Ok(Some(plaintext))
    }

    /// Whether undecrypted bytes remain buffered
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Encrypt an outbound response into wire frames
    ///
    /// The plaintext is sliced into blocks of at most [`MAX_BLOCK`] bytes;
    /// each block consumes one send-counter value.
    ///
    /// # Errors
    ///
    /// Only on cipher failure.
    pub fn seal_frames(&mut self, plaintext: &[u8]) -> Result<Vec<Vec<u8>>, ChannelError> {
        let mut frames = Vec::with_capacity(plaintext.len() / MAX_BLOCK + 1);

        for block in plaintext.chunks(MAX_BLOCK) {
            #[allow(clippy::cast_possible_truncation)]
            let aad = (block.len() as u16).to_le_bytes();
            let nonce = Nonce::from_counter(self.send_seq);
            let ciphertext = self.outbound.seal(&nonce, &aad, block)?;
            self.send_seq += 1;

            let mut frame = Vec::with_capacity(LEN_PREFIX + ciphertext.len());
            frame.extend_from_slice(&aad);
            frame.extend_from_slice(&ciphertext);
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Current send counter
    #[must_use]
    pub fn send_seq(&self) -> u64 {
        self.send_seq
    }

    /// Current receive counter
    #[must_use]
    pub fn recv_seq(&self) -> u64 {
        self.recv_seq
    }
}
