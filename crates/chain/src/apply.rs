//! The apply pipeline: blocks, transactions, operations, contract calls.
//!
//! Application is strictly ordered and transactional: a block binds to the
//! context for its whole application, each transaction runs against an
//! anonymous scratch node that is squashed on success and dropped on
//! failure, and every contract call runs in its own stack frame that pops on
//! every exit path.

use crate::context::{ExecutionContext, Privilege, StackFrame};
use crate::dispatcher::compute_load;
use crate::host::HostApi;
use crate::syscall::{self, ids};
use crate::{ChainError, Result};
use bytes::Bytes;
use kestrel_crypto::ecdsa;
use kestrel_crypto::merkle;
use kestrel_types::codec::Writer;
use kestrel_types::{
    multicodec, object_key, Block, BlockReceipt, Multihash, ObjectSpace, Operation,
    SystemCallTarget, Transaction, TransactionReceipt,
};
use kestrel_vm::VmError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Switches for the optional block checks.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Verify the passive Merkle root
    pub check_passive_data: bool,
    /// Verify the producer signature
    pub check_block_signature: bool,
    /// Verify each transaction's payer signature
    pub check_transaction_signatures: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            check_passive_data: true,
            check_block_signature: true,
            check_transaction_signatures: true,
        }
    }
}

/// Applies a block against the context's current state node.
///
/// The context must not be inside user code. Transaction failures are
/// contained as reverted receipts; every other failure aborts the block.
pub fn apply_block(
    ctx: &Arc<ExecutionContext>,
    block: &Block,
    options: &ApplyOptions,
) -> Result<BlockReceipt> {
    if ctx.is_in_user_code() {
        return Err(ChainError::InsufficientPrivileges);
    }

    let bound = Arc::new(block.clone());
    ctx.with_block(bound, || {
        let code = block.hash_code();

        // Transaction Merkle root.
        let mut leaves = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            leaves.push(Multihash::hash(code, &tx.active_bytes())?);
        }
        if merkle::merkle_root(code, &leaves)? != block.active.transaction_merkle_root {
            return Err(ChainError::TransactionRootMismatch);
        }

        // Network charge for the block envelope; transactions pay their own
        // way inside their sessions.
        let tx_bytes: usize = block.transactions.iter().map(|tx| tx.encode().len()).sum();
        ctx.use_network((block.encode().len() - tx_bytes) as u64)?;

        if options.check_block_signature {
            let digest = block.signing_digest()?;
            let mut args = Writer::new();
            digest.write(&mut args);
            args.write_bytes(&block.active.encode());
            args.write_bytes(&block.signature);
            let verified =
                syscall::invoke_system_call(ctx, ids::VERIFY_BLOCK_SIGNATURE, &args.into_bytes())?;
            if verified != [1] {
                return Err(ChainError::InvalidBlockSignature);
            }
        }

        // Record the head block time before any transaction can observe it.
        let mut args = Writer::new();
        ObjectSpace::metadata().write(&mut args);
        args.write_bytes(object_key::HEAD_BLOCK_TIME);
        args.write_bytes(&block.header.timestamp.to_be_bytes());
        syscall::invoke_system_call(ctx, ids::DB_PUT_OBJECT, &args.into_bytes())?;

        if options.check_passive_data {
            // Leaf layout: block passive, the (still unknowable) block
            // signature slot as the empty hash, then each transaction's
            // passive and signature.
            let mut passives = Vec::with_capacity(2 * (block.transactions.len() + 1));
            passives.push(Multihash::hash(code, &block.passive)?);
            passives.push(Multihash::empty(code)?);
            for tx in &block.transactions {
                passives.push(Multihash::hash(code, &tx.passive)?);
                passives.push(Multihash::hash(code, &tx.signature)?);
            }
            if merkle::merkle_root(code, &passives)? != block.active.passive_merkle_root {
                return Err(ChainError::PassiveRootMismatch);
            }
        }

        let mut receipts = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            match apply_transaction_impl(ctx, tx, options.check_transaction_signatures) {
                Ok(receipt) => receipts.push(receipt),
                Err(error) => {
                    warn!("transaction {} reverted: {error}", tx.id);
                    receipts.push(TransactionReceipt {
                        id: tx.id.clone(),
                        payer: transaction_payer(tx).map(Bytes::from).unwrap_or_default(),
                        rc_limit: tx.active.rc_limit,
                        rc_used: 0,
                        reverted: true,
                        events: Vec::new(),
                        logs: vec![format!("transaction reverted: {error}")],
                    });
                }
            }
        }

        let (disk_used, network_used, compute_used) = ctx.resource_usage();
        info!(
            height = block.header.height,
            transactions = receipts.len(),
            disk_used,
            network_used,
            compute_used,
            "applied block {}",
            block.id
        );

        Ok(BlockReceipt {
            id: block.id.clone(),
            height: block.header.height,
            disk_used,
            network_used,
            compute_used,
            events: ctx.block_events(),
            logs: ctx.block_logs(),
            transaction_receipts: receipts,
        })
    })
}

/// Applies one transaction with full signature checking.
pub fn apply_transaction(ctx: &Arc<ExecutionContext>, tx: &Transaction) -> Result<TransactionReceipt> {
    apply_transaction_impl(ctx, tx, true)
}

fn apply_transaction_impl(
    ctx: &Arc<ExecutionContext>,
    tx: &Transaction,
    check_signature: bool,
) -> Result<TransactionReceipt> {
    if ctx.is_in_user_code() {
        return Err(ChainError::InsufficientPrivileges);
    }

    let bound = Arc::new(tx.clone());
    ctx.with_transaction(bound, || {
        let payer = transaction_payer(tx)?;
        let session = ctx.make_session(tx.active.rc_limit);

        let applied = (|| -> Result<()> {
            if check_signature {
                let mut args = Writer::new();
                args.write_bytes(&payer);
                syscall::invoke_system_call(ctx, ids::REQUIRE_AUTHORITY, &args.into_bytes())?;
            }

            let expected = match stored_nonce(ctx, &payer)? {
                Some(stored) => stored + 1,
                None => 0,
            };
            if tx.active.nonce != expected {
                return Err(ChainError::NonceMismatch {
                    expected,
                    actual: tx.active.nonce,
                });
            }

            // Scope the transaction to an anonymous scratch node so a revert
            // leaves the block state byte-identical, nonce included.
            let block_node = ctx.state_node()?;
            let scratch = Arc::new(block_node.create_anonymous_child());
            ctx.set_state_node(scratch.clone());

            let outcome = (|| -> Result<()> {
                ctx.use_network(tx.encode().len() as u64)?;
                for op in &tx.active.operations {
                    apply_operation(ctx, op)?;
                }
                let mut args = Writer::new();
                ObjectSpace::metadata().write(&mut args);
                args.write_bytes(&object_key::transaction_nonce(&payer));
                args.write_bytes(&tx.active.nonce.to_be_bytes());
                syscall::invoke_system_call(ctx, ids::DB_PUT_OBJECT, &args.into_bytes())?;
                Ok(())
            })();

            ctx.set_state_node(block_node);
            outcome?;
            scratch.commit()?;
            Ok(())
        })();

        ctx.close_session();
        applied?;

        debug!("applied transaction {}", tx.id);
        Ok(TransactionReceipt {
            id: tx.id.clone(),
            payer: Bytes::from(payer),
            rc_limit: tx.active.rc_limit,
            rc_used: session.used_rc(),
            reverted: false,
            events: session.events(),
            logs: session.logs(),
        })
    })
}

fn apply_operation(ctx: &Arc<ExecutionContext>, op: &Operation) -> Result<()> {
    match op {
        Operation::Nop => Ok(()),
        Operation::Reserved => Err(ChainError::ReservedOperation),
        Operation::UploadContract {
            contract_id,
            bytecode,
        } => apply_upload_contract(ctx, contract_id, bytecode),
        Operation::CallContract {
            contract_id,
            entry_point,
            args,
        } => apply_call_contract(ctx, contract_id, *entry_point, args),
        Operation::SetSystemCall { call_id, target } => {
            apply_set_system_call(ctx, *call_id, target)
        }
    }
}

fn apply_upload_contract(
    ctx: &Arc<ExecutionContext>,
    contract_id: &[u8],
    bytecode: &[u8],
) -> Result<()> {
    if ctx.is_in_user_code() {
        return Err(ChainError::InsufficientPrivileges);
    }
    ctx.use_compute(compute_load::MEDIUM)?;

    // Contracts live at their uploader's address.
    let tx = ctx.transaction()?;
    let signer = transaction_signer(&tx)?;
    if signer != contract_id {
        return Err(ChainError::InvalidSignature);
    }

    let mut args = Writer::new();
    ObjectSpace::contract().write(&mut args);
    args.write_bytes(contract_id);
    args.write_bytes(bytecode);
    syscall::invoke_system_call(ctx, ids::DB_PUT_OBJECT, &args.into_bytes())?;
    Ok(())
}

fn apply_call_contract(
    ctx: &Arc<ExecutionContext>,
    contract_id: &[u8],
    entry_point: u32,
    call_args: &[u8],
) -> Result<()> {
    if ctx.is_in_user_code() {
        return Err(ChainError::InsufficientPrivileges);
    }
    ctx.use_compute(compute_load::LIGHT)?;

    let inner = ctx.clone();
    ctx.with_stack_frame(StackFrame::user(b"call_contract_operation"), move || {
        let mut args = Writer::new();
        args.write_bytes(contract_id);
        args.write_u32(entry_point);
        args.write_bytes(call_args);
        syscall::invoke_system_call(&inner, ids::EXECUTE_CONTRACT, &args.into_bytes())?;
        Ok(())
    })
}

fn apply_set_system_call(
    ctx: &Arc<ExecutionContext>,
    call_id: u32,
    target: &SystemCallTarget,
) -> Result<()> {
    if ctx.is_in_user_code() {
        return Err(ChainError::InsufficientPrivileges);
    }
    ctx.use_compute(compute_load::HEAVY)?;

    // Rebinding the dispatcher is reserved to the chain's governing key.
    let tx = ctx.transaction()?;
    let signer = transaction_signer(&tx)?;
    let node = ctx.state_node()?;
    let chain_id_bytes = node
        .get_object(&ObjectSpace::metadata(), object_key::CHAIN_ID)?
        .ok_or(ChainError::MissingContext("chain id"))?;
    if Multihash::hash(multicodec::SHA2_256, &signer)? != Multihash::decode(&chain_id_bytes)? {
        return Err(ChainError::InsufficientPrivileges);
    }

    if call_id == ids::EXECUTE_CONTRACT {
        return Err(ChainError::ForbiddenOverride);
    }

    match target {
        SystemCallTarget::Thunk(tid) => {
            if !ctx.dispatcher().exists(*tid) {
                return Err(ChainError::ThunkNotFound(*tid));
            }
            info!("overriding system call {call_id} with thunk {tid}");
        }
        SystemCallTarget::Bundle(bundle) => {
            let code = node.get_object(&ObjectSpace::contract(), &bundle.contract_id)?;
            if code.map(|c| c.is_empty()).unwrap_or(true) {
                return Err(ChainError::InvalidContract);
            }
            info!(
                entry_point = bundle.entry_point,
                "overriding system call {call_id} with contract 0x{}",
                hex::encode(&bundle.contract_id)
            );
        }
    }

    let mut args = Writer::new();
    ObjectSpace::system_call_dispatch().write(&mut args);
    args.write_bytes(&call_id.to_be_bytes());
    args.write_bytes(&target.encode());
    syscall::invoke_system_call(ctx, ids::DB_PUT_OBJECT, &args.into_bytes())?;
    Ok(())
}

/// Runs a contract's `_start` export inside a fresh frame.
///
/// The frame's accumulated return buffer is the call's result; a contract
/// exiting through `exit_contract(0)` returns normally, every other failure
/// unwinds the frame and propagates.
pub fn execute_contract(
    ctx: &Arc<ExecutionContext>,
    contract_id: &[u8],
    entry_point: u32,
    args: &[u8],
    privilege: Privilege,
) -> Result<Vec<u8>> {
    // Bytecode lives in a system space; read it under a kernel frame.
    let inner = ctx.clone();
    let bytecode = ctx
        .with_stack_frame(StackFrame::kernel(b"execute_contract"), move || {
            Ok(inner
                .state_node()?
                .get_object(&ObjectSpace::contract(), contract_id)?)
        })?
        .filter(|code| !code.is_empty())
        .ok_or(ChainError::InvalidContract)?;

    let module_key = Multihash::hash(multicodec::SHA2_256, &bytecode)?;
    let module = ctx
        .vm()
        .load_module(&module_key.encode(), &bytecode)
        .map_err(|e| ChainError::VmFailure(e.to_string()))?;

    ctx.push_frame(StackFrame {
        contract_id: Bytes::copy_from_slice(contract_id),
        system_call_id: None,
        privilege,
        entry_point,
        arguments: Bytes::copy_from_slice(args),
        return_buffer: Vec::new(),
    })?;

    let host = HostApi::new(ctx.clone());
    let outcome = ctx.vm().run(Box::new(host), &module);
    let frame = ctx
        .pop_frame()
        .ok_or(ChainError::MissingContext("call frame"))?;

    match outcome {
        Ok(()) => Ok(frame.return_buffer),
        Err(err) => {
            let error = ctx
                .take_pending_error()
                .unwrap_or_else(|| match err.downcast::<VmError>() {
                    Ok(VmError::TicksExhausted) => ChainError::ResourceExhausted,
                    Ok(VmError::InsufficientReturnBuffer { .. }) => {
                        ChainError::InsufficientReturnBuffer
                    }
                    Ok(vm_error) => ChainError::VmFailure(vm_error.to_string()),
                    Err(other) => ChainError::VmFailure(format!("{other:#}")),
                });
            match error {
                ChainError::ExitSuccess => Ok(frame.return_buffer),
                error => Err(error),
            }
        }
    }
}

/// Recovers the payer address from a transaction's signature.
pub fn transaction_payer(tx: &Transaction) -> Result<Vec<u8>> {
    transaction_signer(tx)
}

fn transaction_signer(tx: &Transaction) -> Result<Vec<u8>> {
    ecdsa::recover_address(&tx.signature, &tx.signing_digest()?)
        .map_err(|_| ChainError::InvalidSignature)
}

fn stored_nonce(ctx: &Arc<ExecutionContext>, account: &[u8]) -> Result<Option<u64>> {
    let node = ctx.state_node()?;
    Ok(node
        .get_object(&ObjectSpace::metadata(), &object_key::transaction_nonce(account))?
        .and_then(|bytes| bytes.try_into().ok().map(u64::from_be_bytes)))
}

/// The stored nonce for an account; zero when the account is fresh.
pub fn account_nonce(ctx: &Arc<ExecutionContext>, account: &[u8]) -> Result<u64> {
    Ok(stored_nonce(ctx, account)?.unwrap_or(0))
}
