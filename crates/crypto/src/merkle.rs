//! Balanced binary Merkle trees.
//!
//! The leaf list is padded to a power of two by duplicating the last leaf,
//! then reduced pairwise: each parent is the digest of the concatenated child
//! digests under the tree's multihash codec. The root of an empty list is the
//! digest of the empty byte string.

use crate::Result;
use kestrel_types::Multihash;

/// Computes the Merkle root of an ordered list of leaf digests.
///
/// All leaves are expected to use the same codec as `code`; only the raw
/// digest bytes participate in parent hashing.
pub fn merkle_root(code: u64, leaves: &[Multihash]) -> Result<Multihash> {
    if leaves.is_empty() {
        return Ok(Multihash::empty(code)?);
    }

    let mut level: Vec<Multihash> = leaves.to_vec();
    let target = leaves.len().next_power_of_two();
    while level.len() < target {
        level.push(level[level.len() - 1].clone());
    }

    while level.len() > 1 {
        let mut parents = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks_exact(2) {
            parents.push(Multihash::hash_concat(
                code,
                &[pair[0].digest(), pair[1].digest()],
            )?);
        }
        level = parents;
    }

    Ok(level.remove(0))
}

/// Hashes each item and computes the Merkle root over the digests.
pub fn merkle_root_of<T: AsRef<[u8]>>(code: u64, items: &[T]) -> Result<Multihash> {
    let leaves = items
        .iter()
        .map(|item| Ok(Multihash::hash(code, item.as_ref())?))
        .collect::<Result<Vec<_>>>()?;
    merkle_root(code, &leaves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_types::multicodec;

    fn leaf(data: &[u8]) -> Multihash {
        Multihash::hash(multicodec::SHA2_256, data).unwrap()
    }

    #[test]
    fn test_empty_root_is_empty_hash() {
        let root = merkle_root(multicodec::SHA2_256, &[]).unwrap();
        assert_eq!(root, Multihash::empty(multicodec::SHA2_256).unwrap());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let a = leaf(b"a");
        assert_eq!(merkle_root(multicodec::SHA2_256, &[a.clone()]).unwrap(), a);
    }

    #[test]
    fn test_two_leaves() {
        let a = leaf(b"a");
        let b = leaf(b"b");
        let expected =
            Multihash::hash_concat(multicodec::SHA2_256, &[a.digest(), b.digest()]).unwrap();
        assert_eq!(
            merkle_root(multicodec::SHA2_256, &[a, b]).unwrap(),
            expected
        );
    }

    #[test]
    fn test_odd_count_duplicates_last_leaf() {
        let a = leaf(b"a");
        let b = leaf(b"b");
        let c = leaf(b"c");
        // Three leaves pad to [a, b, c, c].
        let explicit = merkle_root(
            multicodec::SHA2_256,
            &[a.clone(), b.clone(), c.clone(), c.clone()],
        )
        .unwrap();
        assert_eq!(merkle_root(multicodec::SHA2_256, &[a, b, c]).unwrap(), explicit);
    }

    #[test]
    fn test_order_matters() {
        let a = leaf(b"a");
        let b = leaf(b"b");
        let ab = merkle_root(multicodec::SHA2_256, &[a.clone(), b.clone()]).unwrap();
        let ba = merkle_root(multicodec::SHA2_256, &[b, a]).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_root_of_hashes_items() {
        let items: Vec<&[u8]> = vec![b"x", b"y", b"z"];
        let leaves: Vec<Multihash> = items.iter().map(|i| leaf(i)).collect();
        assert_eq!(
            merkle_root_of(multicodec::SHA2_256, &items).unwrap(),
            merkle_root(multicodec::SHA2_256, &leaves).unwrap()
        );
    }
}
