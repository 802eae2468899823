//! The chain facade.
//!
//! Wires the state database, the vm backend, and the thunk dispatcher into
//! one handle. Each submitted block gets a writable state node keyed by its
//! id, a fresh execution context, and is finalized on success or discarded
//! on failure. Transport, RPC, and scheduling live outside this crate.

use crate::apply::{self, ApplyOptions};
use crate::config::ChainConfig;
use crate::context::{ExecutionContext, Intent, StackFrame};
use crate::dispatcher::ThunkDispatcher;
use crate::syscall::{self, ids};
use crate::{ChainError, Result};
use kestrel_state::{Backend, StateAccess, StateDatabase};
use kestrel_types::codec::Writer;
use kestrel_types::{multicodec, object_key, Block, BlockReceipt, Multihash, ObjectSpace};
use kestrel_vm::{VmBackend, VmConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// The deterministic execution core behind one state database.
pub struct Chain {
    db: Arc<StateDatabase>,
    vm: Arc<VmBackend>,
    dispatcher: Arc<ThunkDispatcher>,
    config: ChainConfig,
}

impl Chain {
    /// Opens the chain over a backend, seeding genesis on first open.
    ///
    /// Genesis writes the chain id (the digest of the authorized producer
    /// address) plus any configured objects into the root node.
    pub fn open(config: ChainConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        let dispatcher = Arc::new(syscall::register_thunks());
        let vm = Arc::new(
            VmBackend::new(VmConfig {
                module_cache_size: config.module_cache_size,
            })
            .map_err(|e| ChainError::VmFailure(e.to_string()))?,
        );

        let genesis = config.genesis.clone();
        let db = Arc::new(StateDatabase::open(backend, move |root| {
            let chain_id = Multihash::hash(multicodec::SHA2_256, &genesis.producer)
                .map_err(kestrel_state::StateError::from)?;
            root.put_object(
                &ObjectSpace::metadata(),
                object_key::CHAIN_ID,
                &chain_id.encode(),
            )?;
            for object in &genesis.objects {
                root.put_object(&object.space, &object.key, &object.value)?;
            }
            info!("genesis seeded with chain id {chain_id}");
            Ok(())
        })?);

        Ok(Self {
            db,
            vm,
            dispatcher,
            config,
        })
    }

    fn make_context(&self, intent: Intent) -> Arc<ExecutionContext> {
        let ctx = ExecutionContext::new(self.dispatcher.clone(), self.vm.clone(), intent);
        ctx.set_resource_limits(self.config.resource_limits.clone());
        ctx
    }

    /// Applies a block on top of the current head.
    ///
    /// On success the block's node is finalized (moving the head per the
    /// fork rules); on failure the node is discarded and the state is
    /// untouched.
    pub fn submit_block(&self, block: &Block, options: &ApplyOptions) -> Result<BlockReceipt> {
        let head = self.db.get_head();
        if block.header.previous != head.id() {
            return Err(ChainError::UnknownPreviousBlock);
        }
        let node = self
            .db
            .create_writable_node(&head.id(), &block.id)
            .ok_or(ChainError::DuplicateBlock)?;

        let ctx = self.make_context(Intent::BlockApplication);
        ctx.set_state_node(Arc::new(node));

        let inner = ctx.clone();
        let result = ctx.with_stack_frame(StackFrame::kernel(b"apply_block"), move || {
            apply::apply_block(&inner, block, options)
        });

        match result {
            Ok(receipt) => {
                self.db.finalize_node(&block.id)?;
                Ok(receipt)
            }
            Err(error) => {
                warn!("block {} rejected: {error}", block.id);
                self.db.discard_node(&block.id)?;
                Err(error)
            }
        }
    }

    /// Runs a contract read-only against head state and returns its result.
    pub fn read_contract(
        &self,
        contract_id: &[u8],
        entry_point: u32,
        args: &[u8],
    ) -> Result<Vec<u8>> {
        let ctx = self.make_context(Intent::ReadOnly);
        ctx.set_state_node(Arc::new(self.db.get_head()));

        let inner = ctx.clone();
        ctx.with_stack_frame(StackFrame::user(b"read_contract"), move || {
            let mut call = Writer::new();
            call.write_bytes(contract_id);
            call.write_u32(entry_point);
            call.write_bytes(args);
            syscall::invoke_system_call(&inner, ids::EXECUTE_CONTRACT, &call.into_bytes())
        })
    }

    /// The head node's id and revision.
    pub fn head_info(&self) -> (Multihash, u64) {
        let head = self.db.get_head();
        (head.id(), head.revision())
    }

    /// The underlying state database.
    pub fn database(&self) -> &Arc<StateDatabase> {
        &self.db
    }
}
