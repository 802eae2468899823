//! The host interface handed to sandboxed code.
//!
//! Implements the vm layer's embedding contract over a shared execution
//! context. `invoke_thunk` is the privileged fast path; `invoke_system_call`
//! is the public entry every contract uses. Typed failures are parked on the
//! context before crossing into the sandbox, because the sandbox can only
//! transport opaque traps; the nearest `execute_contract` boundary recovers
//! them.

use crate::context::{ExecutionContext, Privilege};
use crate::syscall;
use crate::ChainError;
use kestrel_vm::HostInterface;
use std::sync::Arc;

/// Host-side implementation of the sandbox embedding contract.
pub struct HostApi {
    ctx: Arc<ExecutionContext>,
}

impl HostApi {
    /// Wraps a context for one sandboxed call.
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    fn park(&self, error: ChainError) -> anyhow::Error {
        let message = error.to_string();
        self.ctx.set_pending_error(error);
        anyhow::Error::msg(message)
    }
}

impl HostInterface for HostApi {
    fn invoke_thunk(&self, tid: u32, args: &[u8]) -> anyhow::Result<Vec<u8>> {
        if self.ctx.privilege() != Privilege::Kernel {
            return Err(self.park(ChainError::InsufficientPrivileges));
        }
        let dispatcher = self.ctx.dispatcher().clone();
        dispatcher
            .call(&self.ctx, tid, args)
            .map_err(|error| self.park(error))
    }

    fn invoke_system_call(&self, sid: u32, args: &[u8]) -> anyhow::Result<Vec<u8>> {
        syscall::invoke_system_call(&self.ctx, sid, args).map_err(|error| self.park(error))
    }

    fn get_meter_ticks(&self) -> i64 {
        self.ctx.get_meter_ticks()
    }

    fn use_meter_ticks(&self, ticks: u64) {
        self.ctx.use_meter_ticks(ticks);
    }
}
