//! Receipts and the events they carry.
//!
//! Receipts are an output of the apply pipeline, not consensus data: they are
//! serialized with serde for operators and indexers, never hashed.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An event emitted by a contract or by the kernel during application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    /// Position in the block-wide event stream
    pub sequence: u32,
    /// Contract id of the emitter; empty for kernel events
    pub source: Bytes,
    /// Event name
    pub name: String,
    /// Opaque payload
    pub data: Bytes,
    /// Accounts this event is relevant to
    pub impacted: Vec<Bytes>,
}

/// The result of applying one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Transaction id
    pub id: crate::Multihash,
    /// Recovered payer address
    pub payer: Bytes,
    /// Resource-credit limit the payer offered
    pub rc_limit: u64,
    /// Resource credits actually consumed
    pub rc_used: u64,
    /// Whether the transaction reverted; reverted transactions leave no state
    pub reverted: bool,
    /// Events recorded during the transaction's session
    pub events: Vec<EventData>,
    /// Log lines recorded during the transaction's session
    pub logs: Vec<String>,
}

/// The result of applying one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReceipt {
    /// Block id
    pub id: crate::Multihash,
    /// Block height
    pub height: u64,
    /// Disk storage units consumed by the whole block
    pub disk_used: u64,
    /// Network units consumed by the whole block
    pub network_used: u64,
    /// Compute units consumed by the whole block
    pub compute_used: u64,
    /// Events recorded outside any transaction session
    pub events: Vec<EventData>,
    /// Log lines recorded outside any transaction session
    pub logs: Vec<String>,
    /// Per-transaction receipts in block order
    pub transaction_receipts: Vec<TransactionReceipt>,
}
