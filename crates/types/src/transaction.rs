//! Transactions and the operations they carry.
//!
//! A transaction's *active* data is what the payer signs: a resource-credit
//! limit, a replay-protection nonce, and an ordered list of [`Operation`]s.
//! The passive data and the signature itself are excluded from the signed
//! bytes so they can be pruned without invalidating the chain.

use crate::codec::{Reader, Writer};
use crate::{multicodec, Error, Multihash, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

mod op_tag {
    pub const NOP: u8 = 0x00;
    pub const RESERVED: u8 = 0x01;
    pub const UPLOAD_CONTRACT: u8 = 0x02;
    pub const CALL_CONTRACT: u8 = 0x03;
    pub const SET_SYSTEM_CALL: u8 = 0x04;
}

mod target_tag {
    pub const THUNK: u8 = 0x00;
    pub const BUNDLE: u8 = 0x01;
}

/// A contract entry point registered as a system-call override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractBundle {
    /// Contract to invoke
    pub contract_id: Bytes,
    /// Entry point passed to the contract
    pub entry_point: u32,
}

/// Where a system call resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemCallTarget {
    /// A compiled-in native thunk
    Thunk(u32),
    /// A sandboxed contract call
    Bundle(ContractBundle),
}

impl SystemCallTarget {
    /// Writes the canonical encoding.
    pub fn write(&self, writer: &mut Writer) {
        match self {
            Self::Thunk(id) => {
                writer.write_u8(target_tag::THUNK);
                writer.write_u32(*id);
            }
            Self::Bundle(bundle) => {
                writer.write_u8(target_tag::BUNDLE);
                writer.write_bytes(&bundle.contract_id);
                writer.write_u32(bundle.entry_point);
            }
        }
    }

    /// Reads the canonical encoding.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        match reader.read_u8()? {
            target_tag::THUNK => Ok(Self::Thunk(reader.read_u32()?)),
            target_tag::BUNDLE => Ok(Self::Bundle(ContractBundle {
                contract_id: Bytes::from(reader.read_bytes()?),
                entry_point: reader.read_u32()?,
            })),
            tag => Err(Error::UnknownTag {
                kind: "system call target",
                tag,
            }),
        }
    }

    /// Returns the canonical encoding as a standalone byte string.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.into_bytes()
    }

    /// Decodes a standalone canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let target = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(target)
    }
}

/// One unit of work inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// No effect
    Nop,
    /// Reserved for future use; applying it always fails
    Reserved,
    /// Store contract bytecode under the payer's contract id
    UploadContract {
        /// Address the bytecode is stored under
        contract_id: Bytes,
        /// WASM module bytes
        bytecode: Bytes,
    },
    /// Invoke a contract with user privilege
    CallContract {
        /// Contract to invoke
        contract_id: Bytes,
        /// Entry point passed to the contract
        entry_point: u32,
        /// Opaque call arguments
        args: Bytes,
    },
    /// Replace a system-call dispatch entry
    SetSystemCall {
        /// System call being overridden
        call_id: u32,
        /// New dispatch target
        target: SystemCallTarget,
    },
}

impl Operation {
    /// Writes the canonical encoding.
    pub fn write(&self, writer: &mut Writer) {
        match self {
            Self::Nop => writer.write_u8(op_tag::NOP),
            Self::Reserved => writer.write_u8(op_tag::RESERVED),
            Self::UploadContract {
                contract_id,
                bytecode,
            } => {
                writer.write_u8(op_tag::UPLOAD_CONTRACT);
                writer.write_bytes(contract_id);
                writer.write_bytes(bytecode);
            }
            Self::CallContract {
                contract_id,
                entry_point,
                args,
            } => {
                writer.write_u8(op_tag::CALL_CONTRACT);
                writer.write_bytes(contract_id);
                writer.write_u32(*entry_point);
                writer.write_bytes(args);
            }
            Self::SetSystemCall { call_id, target } => {
                writer.write_u8(op_tag::SET_SYSTEM_CALL);
                writer.write_u32(*call_id);
                target.write(writer);
            }
        }
    }

    /// Reads the canonical encoding.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        match reader.read_u8()? {
            op_tag::NOP => Ok(Self::Nop),
            op_tag::RESERVED => Ok(Self::Reserved),
            op_tag::UPLOAD_CONTRACT => Ok(Self::UploadContract {
                contract_id: Bytes::from(reader.read_bytes()?),
                bytecode: Bytes::from(reader.read_bytes()?),
            }),
            op_tag::CALL_CONTRACT => Ok(Self::CallContract {
                contract_id: Bytes::from(reader.read_bytes()?),
                entry_point: reader.read_u32()?,
                args: Bytes::from(reader.read_bytes()?),
            }),
            op_tag::SET_SYSTEM_CALL => Ok(Self::SetSystemCall {
                call_id: reader.read_u32()?,
                target: SystemCallTarget::read(reader)?,
            }),
            tag => Err(Error::UnknownTag {
                kind: "operation",
                tag,
            }),
        }
    }
}

/// The signed portion of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveTransactionData {
    /// Maximum resource credits this transaction may consume
    pub rc_limit: u64,
    /// Payer nonce; must be exactly one past the stored nonce
    pub nonce: u64,
    /// Operations applied strictly in order
    pub operations: Vec<Operation>,
}

impl ActiveTransactionData {
    /// Writes the canonical encoding.
    pub fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.rc_limit);
        writer.write_u64(self.nonce);
        writer.write_count(self.operations.len());
        for op in &self.operations {
            op.write(writer);
        }
    }

    /// Reads the canonical encoding.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let rc_limit = reader.read_u64()?;
        let nonce = reader.read_u64()?;
        let count = reader.read_count()?;
        let mut operations = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            operations.push(Operation::read(reader)?);
        }
        Ok(Self {
            rc_limit,
            nonce,
            operations,
        })
    }

    /// Returns the canonical encoding as a standalone byte string.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.into_bytes()
    }
}

/// A complete transaction as carried in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Digest of the active data; doubles as the transaction id
    pub id: Multihash,
    /// Signed payload
    pub active: ActiveTransactionData,
    /// Unsigned, prunable payload
    pub passive: Bytes,
    /// Recoverable signature over [`Transaction::signing_digest`]
    pub signature: Bytes,
}

impl Transaction {
    /// Builds a transaction, computing its id from the active data.
    pub fn new(active: ActiveTransactionData, passive: Bytes, signature: Bytes) -> Result<Self> {
        let id = Multihash::hash(multicodec::SHA2_256, &active.encode())?;
        Ok(Self {
            id,
            active,
            passive,
            signature,
        })
    }

    /// Canonical bytes of the active data.
    pub fn active_bytes(&self) -> Vec<u8> {
        self.active.encode()
    }

    /// The digest the payer signs: the SHA-256 multihash of the active data.
    pub fn signing_digest(&self) -> Result<Multihash> {
        Multihash::hash(multicodec::SHA2_256, &self.active.encode())
    }

    /// Writes the canonical encoding.
    pub fn write(&self, writer: &mut Writer) {
        self.id.write(writer);
        self.active.write(writer);
        writer.write_bytes(&self.passive);
        writer.write_bytes(&self.signature);
    }

    /// Reads the canonical encoding.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            id: Multihash::read(reader)?,
            active: ActiveTransactionData::read(reader)?,
            passive: Bytes::from(reader.read_bytes()?),
            signature: Bytes::from(reader.read_bytes()?),
        })
    }

    /// Returns the canonical encoding as a standalone byte string.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.into_bytes()
    }

    /// Decodes a standalone canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let tx = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }
}
