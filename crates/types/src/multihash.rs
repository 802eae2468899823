//! Self-describing cryptographic digests.
//!
//! A [`Multihash`] bundles a multicodec id with the raw digest bytes, so a
//! hash value carries enough information to be re-verified without out-of-band
//! agreement on the digest function. Two multihashes are equal only when the
//! codec id, the digest length, and the digest bytes all match.

use crate::codec::{Reader, Writer};
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

/// Multicodec ids for the digest functions the core accepts.
///
/// The set is deliberately closed: consensus objects name their hash function
/// on the wire, and an id outside this table fails with
/// [`Error::UnknownHashCode`] rather than being silently skipped.
pub mod multicodec {
    /// SHA-256, 32-byte digest
    pub const SHA2_256: u64 = 0x12;
    /// SHA-512, 64-byte digest
    pub const SHA2_512: u64 = 0x13;
}

/// A self-describing cryptographic digest.
///
/// # Example
///
/// ```rust
/// use kestrel_types::{multicodec, Multihash};
///
/// let a = Multihash::hash(multicodec::SHA2_256, b"block").unwrap();
/// let b = Multihash::hash(multicodec::SHA2_512, b"block").unwrap();
/// // Same preimage, different codec: not equal.
/// assert_ne!(a, b);
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multihash {
    code: u64,
    digest: Vec<u8>,
}

impl Multihash {
    /// Creates a multihash from a codec id and raw digest bytes.
    ///
    /// The digest length must match the codec's declared digest size.
    pub fn new(code: u64, digest: Vec<u8>) -> Result<Self> {
        let expected = digest_size(code)?;
        if digest.len() != expected {
            return Err(Error::InvalidLength {
                expected,
                actual: digest.len(),
            });
        }
        Ok(Self { code, digest })
    }

    /// Computes the digest of `data` under the named codec.
    pub fn hash(code: u64, data: &[u8]) -> Result<Self> {
        let digest = match code {
            multicodec::SHA2_256 => Sha256::digest(data).to_vec(),
            multicodec::SHA2_512 => Sha512::digest(data).to_vec(),
            other => return Err(Error::UnknownHashCode(other)),
        };
        Ok(Self { code, digest })
    }

    /// Computes the digest of several concatenated slices under the named codec.
    pub fn hash_concat(code: u64, parts: &[&[u8]]) -> Result<Self> {
        match code {
            multicodec::SHA2_256 => {
                let mut hasher = Sha256::new();
                for part in parts {
                    hasher.update(part);
                }
                Ok(Self {
                    code,
                    digest: hasher.finalize().to_vec(),
                })
            }
            multicodec::SHA2_512 => {
                let mut hasher = Sha512::new();
                for part in parts {
                    hasher.update(part);
                }
                Ok(Self {
                    code,
                    digest: hasher.finalize().to_vec(),
                })
            }
            other => Err(Error::UnknownHashCode(other)),
        }
    }

    /// The all-zero digest under the named codec.
    ///
    /// Used as the sentinel id of the state tree root and as the "no parent"
    /// marker in block headers.
    pub fn zero(code: u64) -> Self {
        let size = digest_size(code).unwrap_or(32);
        Self {
            code,
            digest: vec![0u8; size],
        }
    }

    /// The digest of the empty byte string under the named codec.
    pub fn empty(code: u64) -> Result<Self> {
        Self::hash(code, &[])
    }

    /// The multicodec id.
    #[inline]
    pub fn code(&self) -> u64 {
        self.code
    }

    /// The raw digest bytes.
    #[inline]
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Whether every digest byte is zero.
    pub fn is_zero(&self) -> bool {
        self.digest.iter().all(|b| *b == 0)
    }

    /// Writes the canonical encoding: codec id, digest-size byte, raw digest.
    pub fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.code);
        writer.write_u8(self.digest.len() as u8);
        writer.write_raw(&self.digest);
    }

    /// Reads the canonical encoding.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let code = reader.read_u64()?;
        let size = reader.read_u8()? as usize;
        let expected = digest_size(code)?;
        if size != expected {
            return Err(Error::InvalidLength {
                expected,
                actual: size,
            });
        }
        Ok(Self {
            code,
            digest: reader.read_raw(size)?.to_vec(),
        })
    }

    /// Returns the canonical encoding as a standalone byte string.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::with_capacity(9 + self.digest.len());
        self.write(&mut writer);
        writer.into_bytes()
    }

    /// Decodes a standalone canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let hash = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(hash)
    }
}

/// Digest size in bytes for a supported codec id.
pub fn digest_size(code: u64) -> Result<usize> {
    match code {
        multicodec::SHA2_256 => Ok(32),
        multicodec::SHA2_512 => Ok(64),
        other => Err(Error::UnknownHashCode(other)),
    }
}

impl fmt::Debug for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multihash({:#x}:0x{})", self.code, hex::encode(&self.digest))
    }
}

impl fmt::Display for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.encode()))
    }
}

impl Serialize for Multihash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Multihash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::decode(&bytes).map_err(serde::de::Error::custom)
    }
}
