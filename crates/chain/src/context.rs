//! The execution context.
//!
//! One context lives for one unit of work (a block application, a
//! transaction application, or a read-only call). It owns the call-frame
//! stack, the pointer to the current state node, the bound block and
//! transaction, the resource meter, and the chronicler. The dispatcher and
//! vm backend are injected at construction; nothing in the core is a global.
//!
//! All methods take `&self`; interior fields are individually locked so the
//! context can be shared with the sandbox host across re-entrant calls.

use crate::chronicler::Chronicler;
use crate::dispatcher::ThunkDispatcher;
use crate::resources::{ResourceLimitData, ResourceMeter};
use crate::session::Session;
use crate::{ChainError, Result};
use bytes::Bytes;
use kestrel_state::StateAccess;
use kestrel_types::{Block, EventData, Transaction};
use kestrel_vm::VmBackend;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

/// Maximum call-frame stack depth.
pub const STACK_LIMIT: usize = 256;

/// Privilege level of a call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// May invoke thunks directly and touch system spaces
    Kernel,
    /// Sandboxed; confined to the contract's own spaces
    User,
}

/// Why this context exists; read-only contexts reject writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Queries against head state
    ReadOnly,
    /// Applying a block
    BlockApplication,
    /// Applying a single transaction outside a block
    TransactionApplication,
}

/// One element of the execution call stack.
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// Contract id, or a kernel label for native frames
    pub contract_id: Bytes,
    /// System call this frame services, if it is a dispatch frame
    pub system_call_id: Option<u32>,
    /// Privilege the frame runs at
    pub privilege: Privilege,
    /// Entry point argument for contract frames
    pub entry_point: u32,
    /// Call arguments
    pub arguments: Bytes,
    /// Return buffer accumulated by the callee
    pub return_buffer: Vec<u8>,
}

impl StackFrame {
    /// A kernel-privileged native frame with a diagnostic label.
    pub fn kernel(label: &'static [u8]) -> Self {
        Self {
            contract_id: Bytes::from_static(label),
            system_call_id: None,
            privilege: Privilege::Kernel,
            entry_point: 0,
            arguments: Bytes::new(),
            return_buffer: Vec::new(),
        }
    }

    /// A user-privileged native frame with a diagnostic label.
    pub fn user(label: &'static [u8]) -> Self {
        Self {
            privilege: Privilege::User,
            ..Self::kernel(label)
        }
    }
}

/// A snapshot of one frame's identifying fields.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    /// Contract id or kernel label
    pub contract_id: Bytes,
    /// Frame privilege
    pub privilege: Privilege,
    /// Entry point
    pub entry_point: u32,
    /// Call arguments
    pub arguments: Bytes,
}

/// The execution context threading state, frames, and metering through one
/// unit of work.
pub struct ExecutionContext {
    dispatcher: Arc<ThunkDispatcher>,
    vm: Arc<VmBackend>,
    intent: Intent,
    state: RwLock<Option<Arc<dyn StateAccess>>>,
    block: RwLock<Option<Arc<Block>>>,
    transaction: RwLock<Option<Arc<Transaction>>>,
    frames: RwLock<Vec<StackFrame>>,
    meter: RwLock<ResourceMeter>,
    chronicler: RwLock<Chronicler>,
    pending_error: Mutex<Option<ChainError>>,
}

impl ExecutionContext {
    /// Creates a context over the injected dispatcher and vm backend.
    pub fn new(dispatcher: Arc<ThunkDispatcher>, vm: Arc<VmBackend>, intent: Intent) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            vm,
            intent,
            state: RwLock::new(None),
            block: RwLock::new(None),
            transaction: RwLock::new(None),
            frames: RwLock::new(Vec::new()),
            meter: RwLock::new(ResourceMeter::new()),
            chronicler: RwLock::new(Chronicler::new()),
            pending_error: Mutex::new(None),
        })
    }

    /// The injected thunk dispatcher.
    pub fn dispatcher(&self) -> &Arc<ThunkDispatcher> {
        &self.dispatcher
    }

    /// The injected vm backend.
    pub fn vm(&self) -> &Arc<VmBackend> {
        &self.vm
    }

    /// This context's intent.
    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// Whether writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.intent == Intent::ReadOnly
    }

    // --- state node -------------------------------------------------------

    /// Points the context at a state node.
    pub fn set_state_node(&self, node: Arc<dyn StateAccess>) {
        *self.state.write() = Some(node);
    }

    /// Clears the state pointer.
    pub fn clear_state_node(&self) {
        *self.state.write() = None;
    }

    /// The current state node.
    pub fn state_node(&self) -> Result<Arc<dyn StateAccess>> {
        self.state
            .read()
            .clone()
            .ok_or(ChainError::State(kestrel_state::StateError::StateNodeNotFound))
    }

    // --- bound block / transaction ---------------------------------------

    /// The block being applied, if any.
    pub fn block(&self) -> Option<Arc<Block>> {
        self.block.read().clone()
    }

    /// Scope-binds a block for the duration of `f`, clearing it on every
    /// exit path.
    pub fn with_block<T>(&self, block: Arc<Block>, f: impl FnOnce() -> Result<T>) -> Result<T> {
        *self.block.write() = Some(block);
        let result = f();
        *self.block.write() = None;
        result
    }

    /// The transaction being applied.
    pub fn transaction(&self) -> Result<Arc<Transaction>> {
        self.transaction
            .read()
            .clone()
            .ok_or(ChainError::MissingContext("transaction"))
    }

    /// Scope-binds a transaction for the duration of `f`.
    pub fn with_transaction<T>(
        &self,
        transaction: Arc<Transaction>,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        *self.transaction.write() = Some(transaction);
        let result = f();
        *self.transaction.write() = None;
        result
    }

    // --- call frames ------------------------------------------------------

    /// Pushes a call frame, enforcing the depth limit.
    pub fn push_frame(&self, frame: StackFrame) -> Result<()> {
        let mut frames = self.frames.write();
        if frames.len() >= STACK_LIMIT {
            return Err(ChainError::StackOverflow);
        }
        frames.push(frame);
        Ok(())
    }

    /// Pops the top call frame.
    pub fn pop_frame(&self) -> Option<StackFrame> {
        self.frames.write().pop()
    }

    /// Runs `f` inside `frame`, guaranteeing the pop on every exit path.
    pub fn with_stack_frame<T>(
        &self,
        frame: StackFrame,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.push_frame(frame)?;
        let result = f();
        self.pop_frame();
        result
    }

    /// Snapshot of the frame `depth` below the top (0 = top frame).
    pub fn frame_info(&self, depth: usize) -> Option<FrameInfo> {
        let frames = self.frames.read();
        let index = frames.len().checked_sub(depth + 1)?;
        let frame = &frames[index];
        Some(FrameInfo {
            contract_id: frame.contract_id.clone(),
            privilege: frame.privilege,
            entry_point: frame.entry_point,
            arguments: frame.arguments.clone(),
        })
    }

    /// Privilege of the top frame; kernel when the stack is empty.
    pub fn privilege(&self) -> Privilege {
        self.frames
            .read()
            .last()
            .map(|frame| frame.privilege)
            .unwrap_or(Privilege::Kernel)
    }

    /// Contract id of the frame beneath the top; empty for no caller.
    pub fn caller(&self) -> Bytes {
        self.frame_info(1)
            .map(|info| info.contract_id)
            .unwrap_or_default()
    }

    /// Privilege of the frame beneath the top; kernel for no caller.
    pub fn caller_privilege(&self) -> Privilege {
        self.frame_info(1)
            .map(|info| info.privilege)
            .unwrap_or(Privilege::Kernel)
    }

    /// Whether any frame on the stack runs with user privilege.
    pub fn is_in_user_code(&self) -> bool {
        self.frames
            .read()
            .iter()
            .any(|frame| frame.privilege == Privilege::User)
    }

    /// Current stack depth.
    pub fn stack_depth(&self) -> usize {
        self.frames.read().len()
    }

    /// Writes the return buffer of the frame `depth` below the top.
    pub fn set_return(&self, depth: usize, bytes: Vec<u8>) -> Result<()> {
        let mut frames = self.frames.write();
        let index = frames
            .len()
            .checked_sub(depth + 1)
            .ok_or(ChainError::MissingContext("call frame"))?;
        frames[index].return_buffer = bytes;
        Ok(())
    }

    // --- resource metering ------------------------------------------------

    /// Installs per-block resource limits.
    pub fn set_resource_limits(&self, limits: ResourceLimitData) {
        self.meter.write().set_limits(limits);
    }

    /// Consumes compute units.
    pub fn use_compute(&self, units: u64) -> Result<()> {
        self.meter.write().use_compute_bandwidth(units)
    }

    /// Consumes disk-storage units.
    pub fn use_disk(&self, units: u64) -> Result<()> {
        self.meter.write().use_disk_storage(units)
    }

    /// Consumes network units.
    pub fn use_network(&self, units: u64) -> Result<()> {
        self.meter.write().use_network_bandwidth(units)
    }

    /// `(disk, network, compute)` units consumed so far.
    pub fn resource_usage(&self) -> (u64, u64, u64) {
        let meter = self.meter.read();
        (
            meter.disk_storage_used(),
            meter.network_bandwidth_used(),
            meter.compute_bandwidth_used(),
        )
    }

    /// Remaining compute as sandbox ticks.
    pub fn get_meter_ticks(&self) -> i64 {
        self.meter.read().get_meter_ticks()
    }

    /// Consumes sandbox ticks, saturating at zero.
    pub fn use_meter_ticks(&self, ticks: u64) {
        self.meter.write().use_meter_ticks(ticks);
    }

    /// Opens a transaction session with `rc` credits and attaches it to the
    /// meter and chronicler.
    pub fn make_session(&self, rc: u64) -> Arc<Session> {
        let session = Session::new(rc);
        let weak: Weak<Session> = Arc::downgrade(&session);
        self.meter.write().set_session(weak.clone());
        self.chronicler.write().set_session(weak);
        session
    }

    /// Detaches the current session from the meter and chronicler.
    pub fn close_session(&self) {
        self.meter.write().clear_session();
        self.chronicler.write().clear_session();
    }

    // --- chronicler -------------------------------------------------------

    /// Records an event attributed to `source`.
    pub fn push_event(&self, source: Bytes, name: String, data: Bytes, impacted: Vec<Bytes>) {
        self.chronicler
            .write()
            .push_event(source, name, data, impacted);
    }

    /// Records a log line.
    pub fn push_log(&self, log: String) {
        self.chronicler.write().push_log(log);
    }

    /// Events recorded outside any session.
    pub fn block_events(&self) -> Vec<EventData> {
        self.chronicler.read().block_events()
    }

    /// Logs recorded outside any session.
    pub fn block_logs(&self) -> Vec<String> {
        self.chronicler.read().block_logs()
    }

    // --- sandbox error channel -------------------------------------------

    /// Parks a typed error for the nearest `execute_contract` boundary.
    ///
    /// The sandbox transports host failures as opaque traps; the typed value
    /// is recovered from here when the trap unwinds.
    pub fn set_pending_error(&self, error: ChainError) {
        *self.pending_error.lock() = Some(error);
    }

    /// Takes the parked error, if any.
    pub fn take_pending_error(&self) -> Option<ChainError> {
        self.pending_error.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall;
    use kestrel_vm::VmConfig;

    fn context(intent: Intent) -> Arc<ExecutionContext> {
        let dispatcher = Arc::new(syscall::register_thunks());
        let vm = Arc::new(VmBackend::new(VmConfig::default()).unwrap());
        ExecutionContext::new(dispatcher, vm, intent)
    }

    #[test]
    fn test_frame_stack_lifo() {
        let ctx = context(Intent::BlockApplication);
        ctx.push_frame(StackFrame::kernel(b"outer")).unwrap();
        ctx.push_frame(StackFrame::user(b"inner")).unwrap();

        assert_eq!(ctx.privilege(), Privilege::User);
        assert_eq!(ctx.caller(), Bytes::from_static(b"outer"));
        assert_eq!(ctx.caller_privilege(), Privilege::Kernel);
        assert!(ctx.is_in_user_code());

        let frame = ctx.pop_frame().unwrap();
        assert_eq!(frame.contract_id, Bytes::from_static(b"inner"));
        assert!(!ctx.is_in_user_code());
    }

    #[test]
    fn test_stack_depth_limit() {
        let ctx = context(Intent::ReadOnly);
        for _ in 0..STACK_LIMIT {
            ctx.push_frame(StackFrame::kernel(b"fill")).unwrap();
        }
        assert!(matches!(
            ctx.push_frame(StackFrame::kernel(b"overflow")),
            Err(ChainError::StackOverflow)
        ));
    }

    #[test]
    fn test_with_stack_frame_pops_on_error() {
        let ctx = context(Intent::BlockApplication);
        let result: Result<()> = ctx.with_stack_frame(StackFrame::kernel(b"scoped"), || {
            Err(ChainError::ExitFailure)
        });
        assert!(matches!(result, Err(ChainError::ExitFailure)));
        assert_eq!(ctx.stack_depth(), 0);
    }

    #[test]
    fn test_scoped_block_binding() {
        let ctx = context(Intent::BlockApplication);
        assert!(ctx.block().is_none());
        let block = Arc::new(sample_block());
        let _ = ctx.with_block(block, || {
            assert!(ctx.block().is_some());
            Err::<(), _>(ChainError::ExitFailure)
        });
        assert!(ctx.block().is_none());
    }

    fn sample_block() -> Block {
        use kestrel_types::{multicodec, ActiveBlockData, BlockHeader, Multihash};
        Block {
            id: Multihash::zero(multicodec::SHA2_256),
            header: BlockHeader {
                previous: Multihash::zero(multicodec::SHA2_256),
                height: 0,
                timestamp: 0,
            },
            active: ActiveBlockData {
                transaction_merkle_root: Multihash::zero(multicodec::SHA2_256),
                passive_merkle_root: Multihash::zero(multicodec::SHA2_256),
            },
            passive: Bytes::new(),
            signature: Bytes::new(),
            transactions: Vec::new(),
        }
    }
}
