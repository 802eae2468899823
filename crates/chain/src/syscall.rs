//! System calls: ids, native thunk implementations, and override dispatch.
//!
//! A system call is a logical operation addressed by a numeric id. The
//! compiled-in genesis table maps every system call onto the thunk with the
//! same id; an entry in the dispatch space of the current state node
//! redirects it to a different thunk or to a contract bundle. Native thunks
//! run kernel-privileged in their own dispatch frame; override bundles run
//! at the privilege recorded for their contract.

use crate::apply;
use crate::context::{ExecutionContext, Privilege, StackFrame};
use crate::dispatcher::{compute_load, ThunkDispatcher};
use crate::{ChainError, Result, MAX_DISPATCH_ENTRY_SIZE};
use bytes::Bytes;
use kestrel_crypto::ecdsa;
use kestrel_crypto::merkle;
use kestrel_types::codec::{Reader, Writer};
use kestrel_types::{multicodec, object_key, Multihash, ObjectSpace, SystemCallTarget};
use std::sync::Arc;

/// System-call (and genesis thunk) ids.
pub mod ids {
    /// Append a log line to the session
    pub const PRINTS: u32 = 0x01;
    /// Terminate the calling contract
    pub const EXIT_CONTRACT: u32 = 0x02;
    /// Set the calling contract's return buffer
    pub const SET_CONTRACT_RESULT: u32 = 0x03;
    /// Read the calling contract's arguments
    pub const GET_CONTRACT_ARGUMENTS: u32 = 0x04;
    /// Read the calling contract's entry point
    pub const GET_ENTRY_POINT: u32 = 0x05;
    /// Read the calling contract's caller and its privilege
    pub const GET_CALLER: u32 = 0x06;
    /// Read the calling contract's own id
    pub const GET_CONTRACT_ID: u32 = 0x07;
    /// Invoke a contract; this binding may never be overridden
    pub const EXECUTE_CONTRACT: u32 = 0x08;
    /// Write a state object
    pub const DB_PUT_OBJECT: u32 = 0x09;
    /// Read a state object
    pub const DB_GET_OBJECT: u32 = 0x0a;
    /// Remove a state object
    pub const DB_REMOVE_OBJECT: u32 = 0x0b;
    /// Ordered scan: next object in a space
    pub const DB_GET_NEXT_OBJECT: u32 = 0x0c;
    /// Ordered scan: previous object in a space
    pub const DB_GET_PREV_OBJECT: u32 = 0x0d;
    /// Emit an event
    pub const EVENT: u32 = 0x0e;
    /// Digest bytes under a named codec
    pub const HASH: u32 = 0x0f;
    /// Recover a signer address from a recoverable signature
    pub const RECOVER_PUBLIC_KEY: u32 = 0x10;
    /// Check a block signature against the authorized producer
    pub const VERIFY_BLOCK_SIGNATURE: u32 = 0x11;
    /// Check a Merkle root over a list of leaf digests
    pub const VERIFY_MERKLE_ROOT: u32 = 0x12;
    /// Read head id, height, and head block time
    pub const GET_HEAD_INFO: u32 = 0x13;
    /// Read the bound transaction's signature bytes
    pub const GET_TRANSACTION_SIGNATURE: u32 = 0x14;
    /// Read an account's transaction nonce
    pub const GET_ACCOUNT_NONCE: u32 = 0x15;
    /// Require the bound transaction to be signed by an account
    pub const REQUIRE_AUTHORITY: u32 = 0x16;
}

/// Contract exit code signalling success.
pub const EXIT_SUCCESS: u32 = 0;
/// Contract exit code signalling failure.
pub const EXIT_FAILURE: u32 = 1;

/// Builds the genesis dispatcher with every native thunk registered.
pub fn register_thunks() -> ThunkDispatcher {
    let mut td = ThunkDispatcher::new();
    td.register(ids::PRINTS, compute_load::LIGHT, thunk_prints);
    td.register(ids::EXIT_CONTRACT, compute_load::LIGHT, thunk_exit_contract);
    td.register(
        ids::SET_CONTRACT_RESULT,
        compute_load::LIGHT,
        thunk_set_contract_result,
    );
    td.register(
        ids::GET_CONTRACT_ARGUMENTS,
        compute_load::LIGHT,
        thunk_get_contract_arguments,
    );
    td.register(ids::GET_ENTRY_POINT, compute_load::LIGHT, thunk_get_entry_point);
    td.register(ids::GET_CALLER, compute_load::LIGHT, thunk_get_caller);
    td.register(ids::GET_CONTRACT_ID, compute_load::LIGHT, thunk_get_contract_id);
    td.register(
        ids::EXECUTE_CONTRACT,
        compute_load::MEDIUM,
        thunk_execute_contract,
    );
    td.register(ids::DB_PUT_OBJECT, compute_load::MEDIUM, thunk_db_put_object);
    td.register(ids::DB_GET_OBJECT, compute_load::MEDIUM, thunk_db_get_object);
    td.register(
        ids::DB_REMOVE_OBJECT,
        compute_load::MEDIUM,
        thunk_db_remove_object,
    );
    td.register(
        ids::DB_GET_NEXT_OBJECT,
        compute_load::MEDIUM,
        thunk_db_get_next_object,
    );
    td.register(
        ids::DB_GET_PREV_OBJECT,
        compute_load::MEDIUM,
        thunk_db_get_prev_object,
    );
    td.register(ids::EVENT, compute_load::LIGHT, thunk_event);
    td.register(ids::HASH, compute_load::LIGHT, thunk_hash);
    td.register(
        ids::RECOVER_PUBLIC_KEY,
        compute_load::LIGHT,
        thunk_recover_public_key,
    );
    td.register(
        ids::VERIFY_BLOCK_SIGNATURE,
        compute_load::LIGHT,
        thunk_verify_block_signature,
    );
    td.register(
        ids::VERIFY_MERKLE_ROOT,
        compute_load::LIGHT,
        thunk_verify_merkle_root,
    );
    td.register(ids::GET_HEAD_INFO, compute_load::MEDIUM, thunk_get_head_info);
    td.register(
        ids::GET_TRANSACTION_SIGNATURE,
        compute_load::LIGHT,
        thunk_get_transaction_signature,
    );
    td.register(
        ids::GET_ACCOUNT_NONCE,
        compute_load::LIGHT,
        thunk_get_account_nonce,
    );
    td.register(
        ids::REQUIRE_AUTHORITY,
        compute_load::LIGHT,
        thunk_require_authority,
    );
    td
}

/// Resolves a system call against the dispatch space of the current state
/// node, falling back to the genesis table.
pub fn resolve_target(ctx: &Arc<ExecutionContext>, sid: u32) -> Result<SystemCallTarget> {
    let node = ctx.state_node()?;
    let entry = node.get_object(&ObjectSpace::system_call_dispatch(), &sid.to_be_bytes())?;
    match entry {
        Some(bytes) => {
            if bytes.len() > MAX_DISPATCH_ENTRY_SIZE {
                return Err(ChainError::UnknownSystemCall(sid));
            }
            Ok(SystemCallTarget::decode(&bytes)?)
        }
        None if ctx.dispatcher().exists(sid) => Ok(SystemCallTarget::Thunk(sid)),
        None => Err(ChainError::UnknownSystemCall(sid)),
    }
}

/// The privilege an override contract runs at: user, unless marked as a
/// system contract in the metadata space.
pub fn contract_privilege(ctx: &Arc<ExecutionContext>, contract_id: &[u8]) -> Result<Privilege> {
    let node = ctx.state_node()?;
    let marker = node.get_object(
        &ObjectSpace::metadata(),
        &object_key::system_contract(contract_id),
    )?;
    Ok(match marker {
        Some(_) => Privilege::Kernel,
        None => Privilege::User,
    })
}

/// Dispatches a system call: resolves the target and runs it in a fresh
/// frame with the privilege the target mandates.
pub fn invoke_system_call(ctx: &Arc<ExecutionContext>, sid: u32, args: &[u8]) -> Result<Vec<u8>> {
    match resolve_target(ctx, sid)? {
        SystemCallTarget::Thunk(tid) => {
            let frame = StackFrame {
                contract_id: Bytes::new(),
                system_call_id: Some(sid),
                privilege: Privilege::Kernel,
                entry_point: 0,
                arguments: Bytes::copy_from_slice(args),
                return_buffer: Vec::new(),
            };
            let inner = ctx.clone();
            ctx.with_stack_frame(frame, move || {
                inner.dispatcher().clone().call(&inner, tid, args)
            })
        }
        SystemCallTarget::Bundle(bundle) => {
            let privilege = contract_privilege(ctx, &bundle.contract_id)?;
            apply::execute_contract(ctx, &bundle.contract_id, bundle.entry_point, args, privilege)
        }
    }
}

/// Enforces the database permission rules for an access to `space`.
///
/// A contract may always touch its own zone; kernel-privileged callers may
/// additionally touch the reserved system spaces; everything else is out of
/// bounds.
pub fn check_db_permissions(ctx: &Arc<ExecutionContext>, space: &ObjectSpace) -> Result<()> {
    let caller = ctx.caller();
    if !space.system && space.zone == caller {
        return Ok(());
    }
    match ctx.caller_privilege() {
        Privilege::Kernel => {
            if space.is_reserved() {
                Ok(())
            } else {
                Err(ChainError::InsufficientPrivileges)
            }
        }
        Privilege::User => Err(ChainError::OutOfBounds),
    }
}

// --- thunk implementations ------------------------------------------------
//
// Argument conventions: operations over a single byte string take and return
// the raw bytes unwrapped; everything else uses the canonical codec.

fn thunk_prints(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    ctx.push_log(String::from_utf8_lossy(args).into_owned());
    Ok(Vec::new())
}

fn thunk_exit_contract(_ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let code = reader.read_u32()?;
    reader.finish()?;
    match code {
        EXIT_SUCCESS => Err(ChainError::ExitSuccess),
        EXIT_FAILURE => Err(ChainError::ExitFailure),
        other => Err(ChainError::UnknownExitCode(other)),
    }
}

fn thunk_set_contract_result(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    // The dispatch frame sits on top; the contract frame is one below.
    ctx.set_return(1, args.to_vec())?;
    Ok(Vec::new())
}

fn thunk_get_contract_arguments(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    Reader::new(args).finish()?;
    Ok(ctx
        .frame_info(1)
        .map(|info| info.arguments.to_vec())
        .unwrap_or_default())
}

fn thunk_get_entry_point(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    Reader::new(args).finish()?;
    let entry_point = ctx.frame_info(1).map(|info| info.entry_point).unwrap_or(0);
    Ok(entry_point.to_be_bytes().to_vec())
}

fn thunk_get_caller(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    Reader::new(args).finish()?;
    // Depth 0 is this dispatch frame, depth 1 the calling contract; its
    // caller is at depth 2.
    let (caller, privilege) = ctx
        .frame_info(2)
        .map(|info| (info.contract_id, info.privilege))
        .unwrap_or((Bytes::new(), Privilege::Kernel));
    let mut writer = Writer::new();
    writer.write_bytes(&caller);
    writer.write_u8(match privilege {
        Privilege::Kernel => 0,
        Privilege::User => 1,
    });
    Ok(writer.into_bytes())
}

fn thunk_get_contract_id(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    Reader::new(args).finish()?;
    Ok(ctx.caller().to_vec())
}

fn thunk_execute_contract(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let contract_id = reader.read_bytes()?;
    let entry_point = reader.read_u32()?;
    let call_args = reader.read_bytes()?;
    reader.finish()?;

    // The contract inherits the privilege of whoever issued the system call,
    // not the dispatch frame's.
    let privilege = ctx.caller_privilege();
    apply::execute_contract(ctx, &contract_id, entry_point, &call_args, privilege)
}

fn read_space_key(reader: &mut Reader<'_>) -> Result<(ObjectSpace, Vec<u8>)> {
    let space = ObjectSpace::read(reader)?;
    let key = reader.read_bytes()?;
    Ok((space, key))
}

fn thunk_db_put_object(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    if ctx.is_read_only() {
        return Err(ChainError::ReadOnlyContext);
    }
    let mut reader = Reader::new(args);
    let (space, key) = read_space_key(&mut reader)?;
    let value = reader.read_bytes()?;
    reader.finish()?;

    check_db_permissions(ctx, &space)?;
    ctx.use_disk(value.len() as u64)?;
    let existed = ctx.state_node()?.put_object(&space, &key, &value)?;
    Ok(vec![u8::from(existed)])
}

fn thunk_db_get_object(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let (space, key) = read_space_key(&mut reader)?;
    reader.finish()?;

    check_db_permissions(ctx, &space)?;
    Ok(ctx
        .state_node()?
        .get_object(&space, &key)?
        .unwrap_or_default())
}

fn thunk_db_remove_object(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    if ctx.is_read_only() {
        return Err(ChainError::ReadOnlyContext);
    }
    let mut reader = Reader::new(args);
    let (space, key) = read_space_key(&mut reader)?;
    reader.finish()?;

    check_db_permissions(ctx, &space)?;
    ctx.state_node()?.remove_object(&space, &key)?;
    Ok(Vec::new())
}

fn encode_scan_result(entry: Option<(Vec<u8>, Vec<u8>)>) -> Vec<u8> {
    match entry {
        Some((key, value)) => {
            let mut writer = Writer::new();
            writer.write_bytes(&key);
            writer.write_bytes(&value);
            writer.into_bytes()
        }
        None => Vec::new(),
    }
}

fn thunk_db_get_next_object(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let (space, key) = read_space_key(&mut reader)?;
    reader.finish()?;

    check_db_permissions(ctx, &space)?;
    Ok(encode_scan_result(
        ctx.state_node()?.get_next_object(&space, &key)?,
    ))
}

fn thunk_db_get_prev_object(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let (space, key) = read_space_key(&mut reader)?;
    reader.finish()?;

    check_db_permissions(ctx, &space)?;
    Ok(encode_scan_result(
        ctx.state_node()?.get_prev_object(&space, &key)?,
    ))
}

fn thunk_event(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let name = reader.read_str()?;
    let data = reader.read_bytes()?;
    let count = reader.read_count()?;
    let mut impacted = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        impacted.push(Bytes::from(reader.read_bytes()?));
    }
    reader.finish()?;

    let source = ctx.caller();
    ctx.push_event(source, name, Bytes::from(data), impacted);
    Ok(Vec::new())
}

fn thunk_hash(_ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let code = reader.read_u64()?;
    let data = reader.read_bytes()?;
    reader.finish()?;
    Ok(Multihash::hash(code, &data)?.encode())
}

fn thunk_recover_public_key(_ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let signature = reader.read_bytes()?;
    let digest = Multihash::read(&mut reader)?;
    reader.finish()?;
    ecdsa::recover_address(&signature, &digest)
        .map_err(|_| ChainError::InvalidSignature)
}

fn thunk_verify_block_signature(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let digest = Multihash::read(&mut reader)?;
    let _active_data = reader.read_bytes()?;
    let signature = reader.read_bytes()?;
    reader.finish()?;

    let node = ctx.state_node()?;
    let chain_id_bytes = node
        .get_object(&ObjectSpace::metadata(), object_key::CHAIN_ID)?
        .ok_or(ChainError::MissingContext("chain id"))?;
    let chain_id = Multihash::decode(&chain_id_bytes)?;

    let valid = match ecdsa::recover_address(&signature, &digest) {
        Ok(address) => Multihash::hash(multicodec::SHA2_256, &address)? == chain_id,
        Err(_) => false,
    };
    Ok(vec![u8::from(valid)])
}

fn thunk_verify_merkle_root(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let root = Multihash::read(&mut reader)?;
    let count = reader.read_count()?;
    // Per-leaf compute charge on top of the dispatch cost.
    ctx.use_compute((count as u64).saturating_mul(compute_load::LIGHT))?;
    let mut leaves = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        leaves.push(Multihash::read(&mut reader)?);
    }
    reader.finish()?;

    let computed = merkle::merkle_root(root.code(), &leaves)?;
    Ok(vec![u8::from(computed == root)])
}

fn thunk_get_head_info(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    Reader::new(args).finish()?;
    let node = ctx.state_node()?;

    let head_block_time = match ctx.block() {
        Some(block) => block.header.timestamp,
        None => node
            .get_object(&ObjectSpace::metadata(), object_key::HEAD_BLOCK_TIME)?
            .and_then(|bytes| bytes.try_into().ok().map(u64::from_be_bytes))
            .unwrap_or(0),
    };

    let mut writer = Writer::new();
    node.id().write(&mut writer);
    node.parent_id().write(&mut writer);
    writer.write_u64(node.revision());
    writer.write_u64(head_block_time);
    Ok(writer.into_bytes())
}

fn thunk_get_transaction_signature(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    Reader::new(args).finish()?;
    Ok(ctx.transaction()?.signature.to_vec())
}

fn thunk_get_account_nonce(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let account = reader.read_bytes()?;
    reader.finish()?;
    let nonce = apply::account_nonce(ctx, &account)?;
    Ok(nonce.to_be_bytes().to_vec())
}

fn thunk_require_authority(ctx: &Arc<ExecutionContext>, args: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(args);
    let account = reader.read_bytes()?;
    reader.finish()?;

    let transaction = ctx.transaction()?;
    let signer = ecdsa::recover_address(&transaction.signature, &transaction.signing_digest()?)
        .map_err(|_| ChainError::InvalidSignature)?;
    if signer != account {
        return Err(ChainError::InvalidSignature);
    }
    Ok(Vec::new())
}
