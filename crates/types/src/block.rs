//! Blocks and block headers.
//!
//! A block names its hash function through the codec of the transaction
//! Merkle root in its active data; every digest computed while applying the
//! block (transaction leaves, the signing digest, the passive tree) uses that
//! codec. The signing digest covers the transaction Merkle root, the header,
//! and the active data, in that order.

use crate::codec::{Reader, Writer};
use crate::{Multihash, Result, Transaction};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Block metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Id of the parent block; the zero multihash for the first block
    pub previous: Multihash,
    /// Block height, one past the parent's
    pub height: u64,
    /// Producer-declared timestamp in milliseconds
    pub timestamp: u64,
}

impl BlockHeader {
    /// Writes the canonical encoding.
    pub fn write(&self, writer: &mut Writer) {
        self.previous.write(writer);
        writer.write_u64(self.height);
        writer.write_u64(self.timestamp);
    }

    /// Reads the canonical encoding.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            previous: Multihash::read(reader)?,
            height: reader.read_u64()?,
            timestamp: reader.read_u64()?,
        })
    }

    /// Returns the canonical encoding as a standalone byte string.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.into_bytes()
    }
}

/// The producer-signed portion of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBlockData {
    /// Merkle root over the transactions' active data
    pub transaction_merkle_root: Multihash,
    /// Merkle root over the passive leaves (see the apply pipeline)
    pub passive_merkle_root: Multihash,
}

impl ActiveBlockData {
    /// Writes the canonical encoding.
    pub fn write(&self, writer: &mut Writer) {
        self.transaction_merkle_root.write(writer);
        self.passive_merkle_root.write(writer);
    }

    /// Reads the canonical encoding.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            transaction_merkle_root: Multihash::read(reader)?,
            passive_merkle_root: Multihash::read(reader)?,
        })
    }

    /// Returns the canonical encoding as a standalone byte string.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.into_bytes()
    }
}

/// A complete block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block id: the digest of the signing bytes under the block's hash code
    pub id: Multihash,
    /// Block metadata
    pub header: BlockHeader,
    /// Signed payload
    pub active: ActiveBlockData,
    /// Unsigned, prunable payload
    pub passive: Bytes,
    /// Recoverable producer signature over [`Block::signing_digest`]
    pub signature: Bytes,
    /// Transactions applied strictly in order
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The multicodec id the block declares for all of its hashing.
    pub fn hash_code(&self) -> u64 {
        self.active.transaction_merkle_root.code()
    }

    /// The digest the producer signs.
    ///
    /// Covers the transaction Merkle root, the header, and the active data
    /// under the block-declared hash code.
    pub fn signing_digest(&self) -> Result<Multihash> {
        Multihash::hash_concat(
            self.hash_code(),
            &[
                &self.active.transaction_merkle_root.encode(),
                &self.header.encode(),
                &self.active.encode(),
            ],
        )
    }

    /// Writes the canonical encoding.
    pub fn write(&self, writer: &mut Writer) {
        self.id.write(writer);
        self.header.write(writer);
        self.active.write(writer);
        writer.write_bytes(&self.passive);
        writer.write_bytes(&self.signature);
        writer.write_count(self.transactions.len());
        for tx in &self.transactions {
            tx.write(writer);
        }
    }

    /// Reads the canonical encoding.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let id = Multihash::read(reader)?;
        let header = BlockHeader::read(reader)?;
        let active = ActiveBlockData::read(reader)?;
        let passive = Bytes::from(reader.read_bytes()?);
        let signature = Bytes::from(reader.read_bytes()?);
        let count = reader.read_count()?;
        let mut transactions = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            transactions.push(Transaction::read(reader)?);
        }
        Ok(Self {
            id,
            header,
            active,
            passive,
            signature,
            transactions,
        })
    }

    /// Returns the canonical encoding as a standalone byte string.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.into_bytes()
    }

    /// Decodes a standalone canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let block = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multicodec;

    fn sample_block() -> Block {
        let active = ActiveBlockData {
            transaction_merkle_root: Multihash::hash(multicodec::SHA2_256, b"txs").unwrap(),
            passive_merkle_root: Multihash::hash(multicodec::SHA2_256, b"passives").unwrap(),
        };
        let header = BlockHeader {
            previous: Multihash::zero(multicodec::SHA2_256),
            height: 1,
            timestamp: 1_700_000_000_000,
        };
        Block {
            id: Multihash::hash(multicodec::SHA2_256, b"id").unwrap(),
            header,
            active,
            passive: Bytes::new(),
            signature: Bytes::from_static(&[0u8; 65]),
            transactions: Vec::new(),
        }
    }

    #[test]
    fn test_block_round_trip() {
        let block = sample_block();
        let decoded = Block::decode(&block.encode()).unwrap();
        assert_eq!(block, decoded);
    }

    #[test]
    fn test_hash_code_follows_tx_root() {
        let block = sample_block();
        assert_eq!(block.hash_code(), multicodec::SHA2_256);
    }

    #[test]
    fn test_signing_digest_excludes_signature() {
        let mut block = sample_block();
        let digest = block.signing_digest().unwrap();
        block.signature = Bytes::from_static(&[7u8; 65]);
        assert_eq!(block.signing_digest().unwrap(), digest);

        block.header.timestamp += 1;
        assert_ne!(block.signing_digest().unwrap(), digest);
    }
}
