//! Kestrel State Layer
//!
//! A fork-aware, versioned key-value store. State is organized as a tree of
//! [`delta::StateDelta`] overlays on top of a persistent [`backend::Backend`]:
//!
//! - **Backend**: an ordered key-value store; [`MemoryBackend`] for tests and
//!   ephemeral chains, [`RocksBackend`] for disk persistence
//! - **Delta**: a single revision's writes and tombstones with a parent link,
//!   supporting squash (merge into parent) and commit (fold to the backend)
//! - **Merge iteration**: ordered traversal of the merged view of a delta
//!   chain, resolving each key at the newest delta that mentions it
//! - **Database**: the node tree with head/root tracking, writable-node
//!   creation, finalization, commit, and discard
//!
//! All tree mutations are serialized under a single mutex; readers hold node
//! handles which pin the node's lineage in memory.

#![deny(unsafe_code)]

pub mod backend;
pub mod database;
pub mod delta;
pub mod memory;
pub mod merge;
pub mod node;
pub mod rocks;

pub use backend::Backend;
pub use database::StateDatabase;
pub use memory::MemoryBackend;
pub use merge::MergeIter;
pub use node::{AnonymousStateNode, StateAccess, StateNode};
pub use rocks::{RocksBackend, RocksConfig};

use thiserror::Error;

/// Maximum size of a single object value, in bytes.
pub const MAX_OBJECT_SIZE: usize = 2 * 1024 * 1024;

/// Errors produced by the state layer
#[derive(Error, Debug)]
pub enum StateError {
    /// The underlying backend failed; these are fatal I/O conditions
    #[error("backend failure: {0}")]
    BackendFailure(String),

    /// The referenced state node does not exist
    #[error("state node not found")]
    StateNodeNotFound,

    /// The node is finalized or has children and cannot accept writes
    #[error("state node is not writable")]
    NodeNotWritable,

    /// Discarding this node would remove the head of the chain
    #[error("cannot discard node")]
    CannotDiscard,

    /// Committing this node is not legal (not on the head's ancestor chain)
    #[error("cannot commit node: {0}")]
    CannotCommit(&'static str),

    /// An object value exceeded [`MAX_OBJECT_SIZE`]
    #[error("object of {size} bytes exceeds limit of {limit}")]
    ObjectTooLarge {
        /// Size of the rejected value
        size: usize,
        /// Configured maximum
        limit: usize,
    },

    /// Error from the types layer
    #[error(transparent)]
    Types(#[from] kestrel_types::Error),

    /// Error computing a delta Merkle root
    #[error(transparent)]
    Crypto(#[from] kestrel_crypto::CryptoError),
}

/// Result type for state operations
pub type Result<T> = std::result::Result<T, StateError>;
