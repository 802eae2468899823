//! Transaction application against a writable state node: nonce
//! enforcement, revert atomicity, and operation validation.

mod common;

use bytes::Bytes;
use kestrel_chain::apply;
use kestrel_chain::syscall;
use kestrel_chain::{ChainError, ExecutionContext, Intent};
use kestrel_crypto::PrivateKey;
use kestrel_state::StateAccess;
use kestrel_types::{multicodec, Multihash, Operation};
use kestrel_vm::{VmBackend, VmConfig};
use std::sync::Arc;

/// A context applying onto a fresh writable node of the chain's database.
fn work_context(chain: &kestrel_chain::Chain) -> Arc<ExecutionContext> {
    let db = chain.database();
    let head = db.get_head();
    let node_id = Multihash::hash(multicodec::SHA2_256, b"work node").unwrap();
    let node = db.create_writable_node(&head.id(), &node_id).unwrap();

    let ctx = ExecutionContext::new(
        Arc::new(syscall::register_thunks()),
        Arc::new(VmBackend::new(VmConfig::default()).unwrap()),
        Intent::BlockApplication,
    );
    ctx.set_state_node(Arc::new(node));
    ctx
}

#[test]
fn nonce_enforcement() {
    let key = PrivateKey::random();
    let chain = common::open_chain(&key, Vec::new());
    let ctx = work_context(&chain);

    // Fresh payer: nonce 0 applies.
    let tx = common::sign_transaction(&key, 0, vec![Operation::Nop]);
    let receipt = apply::apply_transaction(&ctx, &tx).unwrap();
    assert!(!receipt.reverted);
    assert_eq!(receipt.payer, Bytes::from(key.public_key().to_address()));

    // Replaying nonce 0 is rejected.
    let replay = common::sign_transaction(&key, 0, vec![Operation::Nop]);
    assert!(matches!(
        apply::apply_transaction(&ctx, &replay),
        Err(ChainError::NonceMismatch {
            expected: 1,
            actual: 0
        })
    ));

    // Nonce 1 applies.
    let next = common::sign_transaction(&key, 1, vec![Operation::Nop]);
    assert!(!apply::apply_transaction(&ctx, &next).unwrap().reverted);
}

#[test]
fn failed_transaction_leaves_state_byte_identical() {
    let key = PrivateKey::random();
    let chain = common::open_chain(&key, Vec::new());
    let ctx = work_context(&chain);
    let node = ctx.state_node().unwrap();

    let before = node.merkle_root().unwrap();

    // The reserved operation always fails, after Nop already ran.
    let tx = common::sign_transaction(&key, 0, vec![Operation::Nop, Operation::Reserved]);
    assert!(matches!(
        apply::apply_transaction(&ctx, &tx),
        Err(ChainError::ReservedOperation)
    ));

    // Not a single byte changed, the nonce included.
    assert_eq!(node.merkle_root().unwrap(), before);

    // So nonce 0 is still fresh.
    let retry = common::sign_transaction(&key, 0, vec![Operation::Nop]);
    assert!(!apply::apply_transaction(&ctx, &retry).unwrap().reverted);
    assert_ne!(node.merkle_root().unwrap(), before);
}

#[test]
fn authority_is_checked_against_payer() {
    let key = PrivateKey::random();
    let chain = common::open_chain(&key, Vec::new());
    let ctx = work_context(&chain);

    // A transaction whose signature does not parse as canonical recoverable
    // bytes cannot even name a payer.
    let mut tx = common::sign_transaction(&key, 0, vec![Operation::Nop]);
    tx.signature = Bytes::from_static(&[0u8; 65]);
    assert!(matches!(
        apply::apply_transaction(&ctx, &tx),
        Err(ChainError::InvalidSignature)
    ));
}

#[test]
fn upload_requires_signer_address() {
    let key = PrivateKey::random();
    let chain = common::open_chain(&key, Vec::new());
    let ctx = work_context(&chain);

    let tx = common::sign_transaction(
        &key,
        0,
        vec![Operation::UploadContract {
            contract_id: Bytes::from_static(b"someone else"),
            bytecode: Bytes::from_static(b"(module)"),
        }],
    );
    assert!(matches!(
        apply::apply_transaction(&ctx, &tx),
        Err(ChainError::InvalidSignature)
    ));
}

#[test]
fn call_of_missing_contract_is_invalid() {
    let key = PrivateKey::random();
    let chain = common::open_chain(&key, Vec::new());
    let ctx = work_context(&chain);

    let tx = common::sign_transaction(
        &key,
        0,
        vec![Operation::CallContract {
            contract_id: Bytes::from_static(b"nowhere"),
            entry_point: 0,
            args: Bytes::new(),
        }],
    );
    assert!(matches!(
        apply::apply_transaction(&ctx, &tx),
        Err(ChainError::InvalidContract)
    ));
}

#[test]
fn frame_stack_depth_is_restored() {
    let key = PrivateKey::random();
    let chain = common::open_chain(&key, Vec::new());
    let ctx = work_context(&chain);
    assert_eq!(ctx.stack_depth(), 0);

    let ok = common::sign_transaction(&key, 0, vec![Operation::Nop]);
    apply::apply_transaction(&ctx, &ok).unwrap();
    assert_eq!(ctx.stack_depth(), 0);

    let bad = common::sign_transaction(&key, 1, vec![Operation::Reserved]);
    let _ = apply::apply_transaction(&ctx, &bad);
    assert_eq!(ctx.stack_depth(), 0);
}
