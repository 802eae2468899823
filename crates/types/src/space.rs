//! Object spaces and reserved object keys.
//!
//! The state store is one logical map `(object_space, object_key) -> bytes`.
//! An [`ObjectSpace`] namespaces a region of that map: reserved system spaces
//! hold kernel metadata, the system-call dispatch table, and uploaded contract
//! bytecode, while every contract owns the family of spaces whose zone equals
//! its contract id.

use crate::codec::{Reader, Writer};
use crate::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved space ids inside the empty (kernel) zone.
mod reserved {
    /// Kernel metadata: chain id, head block time, payer nonces.
    pub const METADATA: u32 = 0;
    /// System-call dispatch overrides, keyed by system-call id.
    pub const SYSTEM_CALL_DISPATCH: u32 = 1;
    /// Uploaded contract bytecode, keyed by contract id.
    pub const CONTRACT: u32 = 2;
}

/// A namespace over the versioned key-value state.
///
/// Ordering of the derived composite keys keeps each space's objects
/// contiguous in the backend, so ordered iteration within a space never walks
/// foreign entries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectSpace {
    /// Whether this is a reserved system space
    pub system: bool,
    /// Owning zone; empty for the kernel, a contract id for contract spaces
    pub zone: Bytes,
    /// Space id within the zone
    pub id: u32,
}

impl ObjectSpace {
    /// The kernel metadata space.
    pub fn metadata() -> Self {
        Self {
            system: true,
            zone: Bytes::new(),
            id: reserved::METADATA,
        }
    }

    /// The system-call dispatch space.
    pub fn system_call_dispatch() -> Self {
        Self {
            system: true,
            zone: Bytes::new(),
            id: reserved::SYSTEM_CALL_DISPATCH,
        }
    }

    /// The contract bytecode space.
    pub fn contract() -> Self {
        Self {
            system: true,
            zone: Bytes::new(),
            id: reserved::CONTRACT,
        }
    }

    /// The default state space owned by a contract.
    pub fn contract_zone(contract_id: impl Into<Bytes>) -> Self {
        Self {
            system: false,
            zone: contract_id.into(),
            id: 0,
        }
    }

    /// Whether this space is one of the enumerated reserved system spaces.
    ///
    /// The reserved set is enumerated here and only here; the database
    /// permission check defers to this predicate.
    pub fn is_reserved(&self) -> bool {
        self.system
            && self.zone.is_empty()
            && matches!(
                self.id,
                reserved::METADATA | reserved::SYSTEM_CALL_DISPATCH | reserved::CONTRACT
            )
    }

    /// Writes the canonical encoding.
    pub fn write(&self, writer: &mut Writer) {
        writer.write_bool(self.system);
        writer.write_bytes(&self.zone);
        writer.write_u32(self.id);
    }

    /// Reads the canonical encoding.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            system: reader.read_bool()?,
            zone: Bytes::from(reader.read_bytes()?),
            id: reader.read_u32()?,
        })
    }

    /// The composite backend key for an object in this space.
    ///
    /// Lexicographic order of composite keys sorts first by space, then by
    /// object key, which is what the merge iterator and the `db_get_next/prev`
    /// thunks rely on.
    pub fn object_key(&self, key: &[u8]) -> Vec<u8> {
        let mut writer = Writer::with_capacity(9 + self.zone.len() + key.len());
        self.write(&mut writer);
        writer.write_raw(key);
        writer.into_bytes()
    }

    /// Splits a composite backend key back into space and object key.
    pub fn split_object_key(composite: &[u8]) -> Result<(Self, Vec<u8>)> {
        let mut reader = Reader::new(composite);
        let space = Self::read(&mut reader)?;
        let remaining = reader.remaining();
        let key = reader.read_raw(remaining)?.to_vec();
        Ok((space, key))
    }
}

impl fmt::Display for ObjectSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.zone.is_empty() {
            write!(f, "{}:{}", if self.system { "sys" } else { "usr" }, self.id)
        } else {
            write!(
                f,
                "{}:0x{}:{}",
                if self.system { "sys" } else { "usr" },
                hex::encode(&self.zone),
                self.id
            )
        }
    }
}

/// Reserved object keys within the kernel metadata space.
pub mod object_key {
    /// The chain id, seeded at genesis.
    pub const CHAIN_ID: &[u8] = b"chain_id";

    /// Timestamp of the most recently applied block header.
    pub const HEAD_BLOCK_TIME: &[u8] = b"head_block_time";

    /// The nonce key for a transaction payer.
    pub fn transaction_nonce(payer: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(payer.len() + 5);
        key.extend_from_slice(payer);
        key.extend_from_slice(b"nonce");
        key
    }

    /// The system-contract marker key for a contract id.
    pub fn system_contract(contract_id: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(contract_id.len() + 15);
        key.extend_from_slice(b"system_contract");
        key.extend_from_slice(contract_id);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_spaces_are_distinct() {
        let spaces = [
            ObjectSpace::metadata(),
            ObjectSpace::system_call_dispatch(),
            ObjectSpace::contract(),
        ];
        for (i, a) in spaces.iter().enumerate() {
            assert!(a.is_reserved());
            for b in spaces.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_contract_zone_is_not_reserved() {
        let space = ObjectSpace::contract_zone(&b"some contract"[..]);
        assert!(!space.is_reserved());
        assert!(!space.system);
    }

    #[test]
    fn test_composite_key_round_trip() {
        let space = ObjectSpace::contract_zone(&b"owner"[..]);
        let composite = space.object_key(b"balance");
        let (back, key) = ObjectSpace::split_object_key(&composite).unwrap();
        assert_eq!(back, space);
        assert_eq!(key, b"balance");
    }

    #[test]
    fn test_composite_keys_group_by_space() {
        let meta = ObjectSpace::metadata();
        let contract = ObjectSpace::contract();
        // Every metadata key sorts below every contract-space key.
        let high_meta = meta.object_key(&[0xff; 8]);
        let low_contract = contract.object_key(&[0x00]);
        assert!(high_meta < low_contract);
    }
}
