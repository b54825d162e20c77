//! Persistent store of controller pairings
//!
//! A bounded table of (identifier, LTPK, permission) records. The server
//! consults it on every Pair-Verify and `/pairings` operation; the
//! configuration snapshot persists it across restarts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard capacity of the pairings store
pub const MAX_PAIRINGS: usize = 10;

/// Maximum controller identifier length in bytes
pub const MAX_CONTROLLER_ID: usize = 36;

/// Length of a controller LTPK
pub const CONTROLLER_KEY_LEN: usize = 32;

/// Controller permission level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Permission {
    /// Regular controller
    Regular = 0x00,
    /// Admin controller: may manage pairings
    Admin = 0x01,
}

impl Permission {
    /// Parse from the TLV `Permissions` byte
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Regular),
            0x01 => Some(Self::Admin),
            _ => None,
        }
    }
}

/// One paired controller
#[derive(Debug, Clone)]
pub struct Controller {
    /// Opaque pairing identifier, at most [`MAX_CONTROLLER_ID`] bytes
    pub id: Vec<u8>,
    /// The controller's long-term Ed25519 public key
    pub ltpk: [u8; CONTROLLER_KEY_LEN],
    /// Permission level
    pub permission: Permission,
}

/// Pairings store errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingsError {
    /// The store is at [`MAX_PAIRINGS`] capacity
    #[error("pairings store full")]
    MaxPeers,

    /// Identifier longer than [`MAX_CONTROLLER_ID`] bytes
    #[error("controller identifier too long: {0} bytes")]
    IdTooLong(usize),

    /// LTPK was not [`CONTROLLER_KEY_LEN`] bytes
    #[error("controller key length invalid: {0} bytes")]
    BadKeyLength(usize),
}

/// Bounded controller-pairing table
#[derive(Debug, Default)]
pub struct Pairings {
    records: Vec<Controller>,
}

impl Pairings {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record (factory reset)
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of pairing records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the accessory is unpaired
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a record; an existing identifier is updated in place
    ///
    /// # Errors
    ///
    /// Fails on a malformed record or when the store is full.
    pub fn add(&mut self, id: &[u8], ltpk: &[u8], permission: Permission) -> Result<(), PairingsError> {
        if id.len() > MAX_CONTROLLER_ID {
            return Err(PairingsError::IdTooLong(id.len()));
        }
        let ltpk: [u8; CONTROLLER_KEY_LEN] = ltpk
            .try_into()
            .map_err(|_| PairingsError::BadKeyLength(ltpk.len()))?;

        if let Some(existing) = self.records.iter_mut().find(|c| c.id == id) {
            existing.ltpk = ltpk;
            existing.permission = permission;
            return Ok(());
        }
        if self.records.len() == MAX_PAIRINGS {
            return Err(PairingsError::MaxPeers);
        }
        self.records.push(Controller {
            id: id.to_vec(),
            ltpk,
            permission,
        });
        Ok(())
    }

    /// Update the permission of an existing record
    pub fn update(&mut self, id: &[u8], permission: Permission) -> bool {
        match self.records.iter_mut().find(|c| c.id == id) {
            Some(record) => {
                record.permission = permission;
                true
            }
            None => false,
        }
    }

    /// Remove a record; returns whether it existed
    pub fn remove(&mut self, id: &[u8]) -> bool {
        let before = self.records.len();
        self.records.retain(|c| c.id != id);
        self.records.len() != before
    }

    /// Look up a controller
    #[must_use]
    pub fn get(&self, id: &[u8]) -> Option<&Controller> {
        self.records.iter().find(|c| c.id == id)
    }

    /// Iterate over all records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Controller> + '_ {
        self.records.iter()
    }

    /// Serializable form for the persistence snapshot
    #[must_use]
    pub fn snapshot(&self) -> Vec<PairingRecord> {
        self.records
            .iter()
            .map(|c| PairingRecord(
                String::from_utf8_lossy(&c.id).into_owned(),
                hex::encode(c.ltpk),
                c.permission as u8,
            ))
            .collect()
    }

    /// Rebuild the store from a snapshot, skipping malformed records
    #[must_use]
    pub fn restore(records: &[PairingRecord]) -> Self {
        let mut pairings = Self::new();
        for PairingRecord(id, ltpk_hex, perm) in records {
            let Ok(ltpk) = hex::decode(ltpk_hex) else {
                continue;
            };
            let Some(permission) = Permission::from_byte(*perm) else {
                continue;
            };
            let _ = pairings.add(id.as_bytes(), &ltpk, permission);
        }
        pairings
    }
}

/// Persisted pairing record: `[id, ltpk_hex, perm]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRecord(pub String, pub String, pub u8);
