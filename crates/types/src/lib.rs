//! # Kestrel Types
//!
//! Core type definitions for the Kestrel execution core.
//!
//! This crate provides the fundamental types shared by the state database,
//! the execution context, and the apply pipeline:
//! - [`Multihash`] - self-describing cryptographic digests
//! - [`ObjectSpace`] - namespaces over the versioned key-value state
//! - [`Block`], [`Transaction`], [`Operation`] - deterministic wire objects
//! - [`codec`] - the canonical binary codec used for all consensus data
//!
//! ## Example
//!
//! ```rust
//! use kestrel_types::{multicodec, Multihash};
//!
//! let digest = Multihash::hash(multicodec::SHA2_256, b"hello world").unwrap();
//! assert_ne!(digest, Multihash::zero(multicodec::SHA2_256));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod block;
pub mod codec;
pub mod multihash;
pub mod receipt;
pub mod space;
pub mod transaction;

pub use block::{ActiveBlockData, Block, BlockHeader};
pub use multihash::{multicodec, Multihash};
pub use receipt::{BlockReceipt, EventData, TransactionReceipt};
pub use space::{object_key, ObjectSpace};
pub use transaction::{
    ActiveTransactionData, ContractBundle, Operation, SystemCallTarget, Transaction,
};

/// Result type alias for Kestrel type operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with Kestrel types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// The multicodec id does not name a supported digest function
    #[error("unknown hash code: {0:#x}")]
    UnknownHashCode(u64),

    /// Canonical decoding ran off the end of the input
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    /// Canonical decoding finished with bytes left over
    #[error("{0} trailing bytes after canonical value")]
    TrailingBytes(usize),

    /// An unknown tag was encountered while decoding a tagged union
    #[error("unknown {kind} tag: {tag:#x}")]
    UnknownTag {
        /// Which union was being decoded
        kind: &'static str,
        /// The offending tag byte
        tag: u8,
    },

    /// A declared length exceeds the configured maximum
    #[error("declared length {declared} exceeds limit {limit}")]
    LengthLimit {
        /// Length prefix read from the wire
        declared: usize,
        /// Maximum accepted length
        limit: usize,
    },

    /// A string field was not valid UTF-8
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
}
