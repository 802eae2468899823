//! # Kestrel Crypto
//!
//! Cryptographic primitives for the Kestrel execution core:
//!
//! - **Recoverable ECDSA** over secp256k1 ([`ecdsa`]) - transaction and block
//!   signatures carry a recovery id so the signer is derived from the
//!   signature instead of being shipped alongside it.
//! - **Merkle trees** ([`merkle`]) - balanced binary hashing with last-leaf
//!   duplication, parameterized over the multihash codec.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod ecdsa;
pub mod merkle;

pub use ecdsa::{PrivateKey, PublicKey, RecoverableSignature};
pub use merkle::merkle_root;

/// Result type alias for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// A private key could not be constructed from the given bytes
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// A public key could not be constructed from the given bytes
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// A signature failed to parse, verify, or recover
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Invalid length for a fixed-size input
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Error from the types layer (unknown hash code, codec failure)
    #[error(transparent)]
    Types(#[from] kestrel_types::Error),
}
