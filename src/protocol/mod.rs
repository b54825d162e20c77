//! Wire-level building blocks: TLV8 and the cryptographic façade

pub mod crypto;
pub mod tlv;
