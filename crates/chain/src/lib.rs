//! Kestrel Chain Layer
//!
//! The deterministic execution core: everything between a serialized block
//! and the state writes it commits.
//!
//! - [`context`] - the execution context: call-frame stack, privilege,
//!   bound block/transaction, state pointer, resource meter
//! - [`dispatcher`] - the registry of native thunks
//! - [`syscall`] - system-call ids, native thunk implementations, and
//!   override resolution against the dispatch table in state
//! - [`host`] - the host interface handed to sandboxed code
//! - [`apply`] - block, transaction, and operation application
//! - [`controller`] - the [`Chain`] facade wiring the state database, vm
//!   backend, and dispatcher together
//!
//! The core is synchronous and wall-clock free; every limit is expressed in
//! consumed resource units so replay is bit-for-bit deterministic.

#![deny(unsafe_code)]

pub mod apply;
pub mod chronicler;
pub mod config;
pub mod context;
pub mod controller;
pub mod dispatcher;
pub mod host;
pub mod resources;
pub mod session;
pub mod syscall;

pub use apply::ApplyOptions;
pub use config::{ChainConfig, GenesisConfig};
pub use context::{ExecutionContext, Intent, Privilege, StackFrame};
pub use controller::Chain;
pub use dispatcher::ThunkDispatcher;
pub use resources::{ResourceLimitData, ResourceMeter};
pub use session::Session;

use thiserror::Error;

/// Largest accepted system-call dispatch entry, in bytes.
pub const MAX_DISPATCH_ENTRY_SIZE: usize = 512;

/// Errors produced while applying blocks, transactions, and contract calls
#[derive(Error, Debug)]
pub enum ChainError {
    /// A privileged operation was attempted from user code
    #[error("insufficient privileges")]
    InsufficientPrivileges,

    /// A system-call return exceeded the caller's buffer
    #[error("insufficient return buffer")]
    InsufficientReturnBuffer,

    /// The call-frame stack exceeded its depth limit
    #[error("call frame stack overflow")]
    StackOverflow,

    /// The referenced contract has no bytecode in state
    #[error("invalid contract")]
    InvalidContract,

    /// No thunk is registered under this id
    #[error("thunk {0} not found")]
    ThunkNotFound(u32),

    /// No thunk or override satisfies this system call
    #[error("unknown system call {0}")]
    UnknownSystemCall(u32),

    /// The system call may not be overridden
    #[error("forbidden system call override")]
    ForbiddenOverride,

    /// A write was attempted in a read-only context
    #[error("cannot write during a read-only context")]
    ReadOnlyContext,

    /// A database access targeted a space the caller does not own
    #[error("out of bounds database access")]
    OutOfBounds,

    /// A transaction signature failed authority verification
    #[error("invalid signature")]
    InvalidSignature,

    /// The block signature does not match the authorized producer
    #[error("invalid block signature")]
    InvalidBlockSignature,

    /// The computed transaction Merkle root disagrees with the block
    #[error("transaction merkle root mismatch")]
    TransactionRootMismatch,

    /// The computed passive Merkle root disagrees with the block
    #[error("passive merkle root mismatch")]
    PassiveRootMismatch,

    /// The transaction nonce is not one past the stored nonce
    #[error("nonce mismatch: expected {expected}, got {actual}")]
    NonceMismatch {
        /// Nonce the chain requires next
        expected: u64,
        /// Nonce the transaction carried
        actual: u64,
    },

    /// A resource budget was exhausted
    #[error("resource exhausted")]
    ResourceExhausted,

    /// A reserved operation was applied
    #[error("reserved operation")]
    ReservedOperation,

    /// A contract passed an exit code outside the defined set
    #[error("unknown exit code {0}")]
    UnknownExitCode(u32),

    /// Sentinel: the contract exited successfully
    #[error("contract exit")]
    ExitSuccess,

    /// Sentinel: the contract exited with failure
    #[error("contract exit failure")]
    ExitFailure,

    /// A block referenced a previous block that is not the current head
    #[error("unknown previous block")]
    UnknownPreviousBlock,

    /// The block id already names a state node
    #[error("block has already been applied")]
    DuplicateBlock,

    /// A thunk needed a bound block or transaction that is absent
    #[error("no {0} bound to the execution context")]
    MissingContext(&'static str),

    /// The sandbox failed outside the defined error set
    #[error("vm failure: {0}")]
    VmFailure(String),

    /// Configuration could not be loaded or validated
    #[error("configuration error: {0}")]
    Config(String),

    /// Error from the state layer
    #[error(transparent)]
    State(#[from] kestrel_state::StateError),

    /// Error from the types layer
    #[error(transparent)]
    Types(#[from] kestrel_types::Error),

    /// Error from the crypto layer
    #[error(transparent)]
    Crypto(#[from] kestrel_crypto::CryptoError),
}

/// Result type for chain operations
pub type Result<T> = std::result::Result<T, ChainError>;
