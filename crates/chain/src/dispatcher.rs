//! The thunk registry.
//!
//! A thunk is a compiled-in native operation addressed by numeric id. A
//! thunk binding is immutable for the life of the chain: a buggy thunk keeps
//! its id and behavior, and governance repoints the *system call* at a new
//! thunk id instead. The dispatcher charges each thunk's declared compute
//! cost before invoking it.

use crate::context::ExecutionContext;
use crate::{ChainError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Fixed compute charges for native operations.
pub mod compute_load {
    /// Constant-time bookkeeping
    pub const LIGHT: u64 = 100;
    /// State access and crypto
    pub const MEDIUM: u64 = 1_000;
    /// Dispatch-table surgery
    pub const HEAVY: u64 = 10_000;
}

/// A native thunk implementation over raw argument bytes.
pub type ThunkHandler = fn(&Arc<ExecutionContext>, &[u8]) -> Result<Vec<u8>>;

struct ThunkEntry {
    compute_cost: u64,
    handler: ThunkHandler,
}

/// Registry mapping thunk ids to their native implementations.
///
/// Built once at startup and injected into every execution context.
#[derive(Default)]
pub struct ThunkDispatcher {
    thunks: BTreeMap<u32, ThunkEntry>,
}

impl ThunkDispatcher {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a thunk under `id` with a fixed compute cost.
    ///
    /// Re-registering an id replaces the binding; the genesis table is built
    /// exactly once so this only matters for tests.
    pub fn register(&mut self, id: u32, compute_cost: u64, handler: ThunkHandler) {
        self.thunks.insert(
            id,
            ThunkEntry {
                compute_cost,
                handler,
            },
        );
    }

    /// Whether a thunk is registered under `id`.
    pub fn exists(&self, id: u32) -> bool {
        self.thunks.contains_key(&id)
    }

    /// Charges the thunk's compute cost and invokes it.
    pub fn call(&self, ctx: &Arc<ExecutionContext>, id: u32, args: &[u8]) -> Result<Vec<u8>> {
        let entry = self
            .thunks
            .get(&id)
            .ok_or(ChainError::ThunkNotFound(id))?;
        ctx.use_compute(entry.compute_cost)?;
        (entry.handler)(ctx, args)
    }
}
