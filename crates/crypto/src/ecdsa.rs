//! Recoverable ECDSA signatures over secp256k1.
//!
//! Signatures are 65 bytes on the wire: `r[32] || s[32] || v[1]`, where `v`
//! is the recovery id. Only canonical (low-s) signatures are accepted during
//! recovery, so a signature cannot be malleated into a second valid encoding
//! of itself.
//!
//! ## Example
//!
//! ```rust
//! use kestrel_crypto::PrivateKey;
//! use kestrel_types::{multicodec, Multihash};
//!
//! let key = PrivateKey::random();
//! let digest = Multihash::hash(multicodec::SHA2_256, b"payload").unwrap();
//! let signature = key.sign(&digest).unwrap();
//!
//! let recovered = signature.recover(&digest).unwrap();
//! assert_eq!(recovered.to_address(), key.public_key().to_address());
//! ```

use crate::{CryptoError, Result};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use kestrel_types::Multihash;
use rand::rngs::OsRng;
use std::fmt;

/// Byte length of a recoverable signature on the wire.
pub const SIGNATURE_LENGTH: usize = 65;

/// Byte length of an address (a compressed SEC1 public key).
pub const ADDRESS_LENGTH: usize = 33;

/// A secp256k1 private key.
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Generates a random private key from the OS entropy source.
    pub fn random() -> Self {
        Self {
            inner: SigningKey::random(&mut OsRng),
        }
    }

    /// Creates a private key from raw scalar bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = SigningKey::from_bytes(bytes.into())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Creates a private key from a hex string, with or without `0x` prefix.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&bytes);
        Self::from_bytes(&raw)
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Signs a digest, producing a recoverable signature.
    ///
    /// The signature is always canonical (low-s).
    pub fn sign(&self, digest: &Multihash) -> Result<RecoverableSignature> {
        let (signature, recovery_id) = self
            .inner
            .sign_prehash_recoverable(digest.digest())
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        Ok(RecoverableSignature {
            signature,
            recovery_id,
        })
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        write!(f, "PrivateKey(..)")
    }
}

/// A secp256k1 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Parses a public key from SEC1 bytes (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// The account address derived from this key: its compressed SEC1 bytes.
    pub fn to_address(&self) -> Vec<u8> {
        self.inner.to_encoded_point(true).as_bytes().to_vec()
    }
}

/// A 65-byte recoverable ECDSA signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverableSignature {
    signature: K256Signature,
    recovery_id: RecoveryId,
}

impl RecoverableSignature {
    /// Parses a signature from its 65-byte wire form `r || s || v`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(CryptoError::InvalidLength {
                expected: SIGNATURE_LENGTH,
                actual: bytes.len(),
            });
        }
        let signature = K256Signature::from_slice(&bytes[..64])
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        let recovery_id = RecoveryId::from_byte(bytes[64])
            .ok_or_else(|| CryptoError::InvalidSignature("invalid recovery id".into()))?;
        Ok(Self {
            signature,
            recovery_id,
        })
    }

    /// Serializes to the 65-byte wire form `r || s || v`.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes[..64].copy_from_slice(&self.signature.to_bytes());
        bytes[64] = self.recovery_id.to_byte();
        bytes
    }

    /// Whether the signature is in canonical low-s form.
    pub fn is_canonical(&self) -> bool {
        self.signature.normalize_s().is_none()
    }

    /// Recovers the signing public key from the signature and digest.
    ///
    /// Fails on non-canonical signatures.
    pub fn recover(&self, digest: &Multihash) -> Result<PublicKey> {
        if !self.is_canonical() {
            return Err(CryptoError::InvalidSignature(
                "signature must be canonical".into(),
            ));
        }
        let inner =
            VerifyingKey::recover_from_prehash(digest.digest(), &self.signature, self.recovery_id)
                .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        Ok(PublicKey { inner })
    }
}

/// Recovers the signer's address from a 65-byte signature over a digest.
///
/// Convenience for the common "who signed this" path in the apply pipeline.
pub fn recover_address(signature: &[u8], digest: &Multihash) -> Result<Vec<u8>> {
    let signature = RecoverableSignature::from_bytes(signature)?;
    Ok(signature.recover(digest)?.to_address())
}
