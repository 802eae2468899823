//! Kestrel VM Layer
//!
//! Embeds wasmtime as the contract sandbox:
//!
//! - [`VmBackend`] configures a deterministic engine (fuel metering, NaN
//!   canonicalization, no threads), compiles modules through a shared LRU
//!   [`ModuleCache`], and runs single-shot instantiations against a host
//! - [`HostInterface`] is the embedding contract: the two host entry points
//!   exposed to sandboxed code plus the tick accounting the engine's fuel is
//!   reconciled against
//!
//! The execution layer supplies the [`HostInterface`] implementation; this
//! crate owns everything on the sandbox side of that boundary, including the
//! linear-memory bounds checks for argument and return buffers.

#![deny(unsafe_code)]

pub mod cache;
pub mod runtime;

pub use cache::ModuleCache;
pub use runtime::{HostInterface, VmBackend, VmConfig};

use thiserror::Error;

/// Errors produced by the sandbox embedding
#[derive(Error, Debug)]
pub enum VmError {
    /// The bytecode failed to compile as a WASM module
    #[error("invalid module: {0}")]
    InvalidModule(String),

    /// The module does not export a required symbol
    #[error("module is missing required export `{0}`")]
    MissingExport(&'static str),

    /// Module instantiation failed
    #[error("instantiation failed: {0}")]
    Instantiation(String),

    /// A host-call buffer lies outside the sandbox's linear memory
    #[error("sandbox memory access out of bounds")]
    MemoryAccessViolation,

    /// A host-call return exceeds the caller-provided buffer
    #[error("return buffer too small: need {needed}, have {available}")]
    InsufficientReturnBuffer {
        /// Bytes the call produced
        needed: usize,
        /// Bytes the caller reserved
        available: usize,
    },

    /// The sandbox ran out of compute ticks
    #[error("compute ticks exhausted")]
    TicksExhausted,

    /// The sandbox trapped for a non-fuel reason
    #[error("sandbox trap: {0}")]
    Trap(String),
}

/// Result type for vm operations
pub type Result<T> = std::result::Result<T, VmError>;
