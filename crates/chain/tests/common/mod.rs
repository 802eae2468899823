//! Shared fixtures for chain integration tests.
#![allow(dead_code)]

use bytes::Bytes;
use kestrel_chain::config::GenesisObject;
use kestrel_chain::{Chain, ChainConfig};
use kestrel_crypto::merkle;
use kestrel_crypto::PrivateKey;
use kestrel_state::MemoryBackend;
use kestrel_types::{
    multicodec, ActiveBlockData, ActiveTransactionData, Block, BlockHeader, Multihash,
    ObjectSpace, Operation, Transaction,
};
use std::sync::Arc;

/// A contract that invokes `prints("hi")` through the system-call interface.
pub const PRINT_CALLER_WAT: &str = r#"
(module
  (import "env" "invoke_system_call"
    (func $syscall (param i32 i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "hi")
  (func (export "_start")
    (drop (call $syscall (i32.const 1) (i32.const 64) (i32.const 16)
                         (i32.const 16) (i32.const 2)))))
"#;

/// A `prints` override: stores the printed string at `last` in its own zone.
///
/// The static data at 768 is the `db_put_object` argument prefix for the
/// space `{system: false, zone: "printstore", id: 0}` and the key `last`;
/// the value length and bytes are filled in at runtime from this call's
/// arguments.
pub const PRINT_STORE_WAT: &str = r#"
(module
  (import "env" "invoke_system_call"
    (func $syscall (param i32 i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 768)
    "\00\00\00\00\0aprintstore\00\00\00\00\00\00\00\04last")
  (func (export "_start")
    (local $n i32)
    (local.set $n (call $syscall (i32.const 4) (i32.const 1280) (i32.const 256)
                                 (i32.const 0) (i32.const 0)))
    (i32.store8 (i32.const 795) (i32.shr_u (local.get $n) (i32.const 24)))
    (i32.store8 (i32.const 796) (i32.shr_u (local.get $n) (i32.const 16)))
    (i32.store8 (i32.const 797) (i32.shr_u (local.get $n) (i32.const 8)))
    (i32.store8 (i32.const 798) (local.get $n))
    (memory.copy (i32.const 799) (i32.const 1280) (local.get $n))
    (drop (call $syscall (i32.const 9) (i32.const 1536) (i32.const 8)
                         (i32.const 768)
                         (i32.add (i32.const 31) (local.get $n))))))
"#;

/// A contract that echoes its arguments through `set_contract_result`.
pub const ECHO_WAT: &str = r#"
(module
  (import "env" "invoke_system_call"
    (func $syscall (param i32 i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "_start")
    (local $n i32)
    (local.set $n (call $syscall (i32.const 4) (i32.const 256) (i32.const 128)
                                 (i32.const 0) (i32.const 0)))
    (drop (call $syscall (i32.const 3) (i32.const 0) (i32.const 0)
                         (i32.const 256) (local.get $n)))))
"#;

/// A contract that tries to invoke a thunk directly (needs kernel privilege).
pub const THUNK_CALLER_WAT: &str = r#"
(module
  (import "env" "invoke_thunk"
    (func $thunk (param i32 i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "hi")
  (func (export "_start")
    (drop (call $thunk (i32.const 1) (i32.const 64) (i32.const 16)
                       (i32.const 16) (i32.const 2)))))
"#;

/// A contract that exits with the failure code.
pub const EXIT_FAILURE_WAT: &str = r#"
(module
  (import "env" "invoke_system_call"
    (func $syscall (param i32 i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "\00\00\00\01")
  (func (export "_start")
    (drop (call $syscall (i32.const 2) (i32.const 0) (i32.const 0)
                         (i32.const 16) (i32.const 4)))))
"#;

/// Seeds a contract's bytecode at genesis.
pub fn genesis_contract(id: &[u8], wat: &str) -> GenesisObject {
    GenesisObject {
        space: ObjectSpace::contract(),
        key: Bytes::copy_from_slice(id),
        value: Bytes::copy_from_slice(wat.as_bytes()),
    }
}

/// Opens a chain over a fresh in-memory backend.
pub fn open_chain(producer: &PrivateKey, objects: Vec<GenesisObject>) -> Chain {
    let mut config = ChainConfig::with_producer(producer.public_key().to_address());
    config.genesis.objects = objects;
    Chain::open(config, Arc::new(MemoryBackend::new())).unwrap()
}

/// Builds and signs a transaction.
pub fn sign_transaction(key: &PrivateKey, nonce: u64, operations: Vec<Operation>) -> Transaction {
    let active = ActiveTransactionData {
        rc_limit: 10_000_000,
        nonce,
        operations,
    };
    let digest = Multihash::hash(multicodec::SHA2_256, &active.encode()).unwrap();
    let signature = key.sign(&digest).unwrap().to_bytes();
    Transaction::new(active, Bytes::new(), Bytes::copy_from_slice(&signature)).unwrap()
}

/// Builds and signs a block with explicitly chosen Merkle roots.
pub fn build_block_raw(
    key: &PrivateKey,
    previous: &Multihash,
    height: u64,
    timestamp: u64,
    transactions: Vec<Transaction>,
    transaction_merkle_root: Multihash,
    passive_merkle_root: Multihash,
) -> Block {
    let mut block = Block {
        id: Multihash::zero(multicodec::SHA2_256),
        header: BlockHeader {
            previous: previous.clone(),
            height,
            timestamp,
        },
        active: ActiveBlockData {
            transaction_merkle_root,
            passive_merkle_root,
        },
        passive: Bytes::new(),
        signature: Bytes::new(),
        transactions,
    };
    let digest = block.signing_digest().unwrap();
    block.signature = Bytes::copy_from_slice(&key.sign(&digest).unwrap().to_bytes());
    block.id = digest;
    block
}

/// Builds and signs a well-formed block on top of `previous`.
pub fn build_block(
    key: &PrivateKey,
    previous: &Multihash,
    height: u64,
    timestamp: u64,
    transactions: Vec<Transaction>,
) -> Block {
    let code = multicodec::SHA2_256;

    let leaves: Vec<Multihash> = transactions
        .iter()
        .map(|tx| Multihash::hash(code, &tx.active_bytes()).unwrap())
        .collect();
    let tx_root = merkle::merkle_root(code, &leaves).unwrap();

    let mut passives = vec![
        Multihash::hash(code, b"").unwrap(),
        Multihash::empty(code).unwrap(),
    ];
    for tx in &transactions {
        passives.push(Multihash::hash(code, &tx.passive).unwrap());
        passives.push(Multihash::hash(code, &tx.signature).unwrap());
    }
    let passive_root = merkle::merkle_root(code, &passives).unwrap();

    build_block_raw(
        key,
        previous,
        height,
        timestamp,
        transactions,
        tx_root,
        passive_root,
    )
}
