//! Merged iteration over delta chains.

use kestrel_state::delta::StateDelta;
use kestrel_state::{Backend, MemoryBackend, MergeIter};
use kestrel_types::Multihash;
use std::sync::Arc;

enum Op<'a> {
    Put(&'a [u8], &'a [u8]),
    Erase(&'a [u8]),
}

/// Builds a chain of deltas from per-revision op lists and returns the head.
fn build_chain(revisions: &[Vec<Op<'_>>]) -> Arc<StateDelta> {
    let mut delta = StateDelta::new_root(Arc::new(MemoryBackend::new())).unwrap();
    for (index, ops) in revisions.iter().enumerate() {
        delta = StateDelta::child(
            delta,
            Multihash::hash(0x12, &index.to_be_bytes()).unwrap(),
        );
        for op in ops {
            match op {
                Op::Put(k, v) => delta.put(k, v).unwrap(),
                Op::Erase(k) => delta.erase(k).unwrap(),
            }
        }
    }
    delta
}

/// Applies the same ops in order onto a bare backend and reads it out sorted.
fn flatten(revisions: &[Vec<Op<'_>>]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let backend = MemoryBackend::new();
    for ops in revisions {
        for op in ops {
            match op {
                Op::Put(k, v) => backend.put(k, v).unwrap(),
                Op::Erase(k) => backend.delete(k).unwrap(),
            }
        }
    }
    let mut entries = Vec::new();
    let mut cursor = backend.first().unwrap();
    while let Some((key, value)) = cursor {
        cursor = backend.next_after(&key).unwrap();
        entries.push((key, value));
    }
    entries
}

fn scenario() -> Vec<Vec<Op<'static>>> {
    vec![
        vec![
            Op::Put(b"apple", b"1"),
            Op::Put(b"cherry", b"1"),
            Op::Put(b"grape", b"1"),
        ],
        vec![
            Op::Put(b"banana", b"2"),
            Op::Erase(b"cherry"),
            Op::Put(b"grape", b"2"),
        ],
        vec![
            Op::Put(b"cherry", b"3"),
            Op::Erase(b"apple"),
            Op::Put(b"fig", b"3"),
        ],
    ]
}

#[test]
fn forward_iteration_matches_flattened_backend() {
    let revisions = scenario();
    let merged = MergeIter::new(build_chain(&revisions))
        .collect_forward()
        .unwrap();
    assert_eq!(merged, flatten(&revisions));
}

#[test]
fn backward_iteration_is_forward_reversed() {
    let revisions = scenario();
    let mut expected = flatten(&revisions);
    expected.reverse();

    let mut iter = MergeIter::new(build_chain(&revisions));
    let mut reversed = Vec::new();
    let mut cursor = iter.seek_last().unwrap();
    while let Some(entry) = cursor {
        reversed.push(entry);
        cursor = iter.prev().unwrap();
    }
    assert_eq!(reversed, expected);
}

#[test]
fn newest_decision_wins_ties() {
    let revisions = scenario();
    let mut iter = MergeIter::new(build_chain(&revisions));
    // grape written in two revisions; the newer value is observed.
    let (_, value) = iter.seek(b"grape").unwrap().unwrap();
    assert_eq!(value, b"2");
    // cherry erased then re-written in the newest delta.
    let (_, value) = iter.seek(b"cherry").unwrap().unwrap();
    assert_eq!(value, b"3");
}

#[test]
fn tombstoned_keys_are_skipped() {
    let revisions = scenario();
    let mut iter = MergeIter::new(build_chain(&revisions));
    // apple is erased at the newest revision; seeking at or before it lands
    // on the next live key.
    let (key, _) = iter.seek(b"apple").unwrap().unwrap();
    assert_eq!(key, b"banana");
}

#[test]
fn lower_bound_between_keys() {
    let revisions = scenario();
    let mut iter = MergeIter::new(build_chain(&revisions));
    let (key, _) = iter.seek(b"d").unwrap().unwrap();
    assert_eq!(key, b"fig");
    assert!(iter.seek(b"z").unwrap().is_none());
}

#[test]
fn next_and_prev_are_inverses() {
    let revisions = scenario();
    let mut iter = MergeIter::new(build_chain(&revisions));
    let first = iter.seek_first().unwrap().unwrap();
    let second = iter.next().unwrap().unwrap();
    assert_eq!(iter.prev().unwrap().unwrap(), first);
    assert_eq!(iter.next().unwrap().unwrap(), second);
}

#[test]
fn composite_keys_iterate_in_encoded_order() {
    // A secondary "by group then by member" ordering expressed in key bytes.
    let mut revisions = vec![Vec::new(), Vec::new()];
    let mut expected_keys = Vec::new();
    for group in [1u8, 2] {
        for member in [b'a', b'b', b'c'] {
            expected_keys.push(vec![group, member]);
        }
    }
    // Interleave writes across two deltas.
    let keys: Vec<Vec<u8>> = expected_keys.clone();
    for (index, key) in keys.iter().enumerate() {
        revisions[index % 2].push(OwnedPut(key.clone()));
    }

    // Expand owned ops into the chain directly.
    let mut delta = StateDelta::new_root(Arc::new(MemoryBackend::new())).unwrap();
    for (index, ops) in revisions.iter().enumerate() {
        delta = StateDelta::child(
            delta,
            Multihash::hash(0x12, &index.to_be_bytes()).unwrap(),
        );
        for OwnedPut(key) in ops {
            delta.put(key, b"v").unwrap();
        }
    }

    let merged = MergeIter::new(delta).collect_forward().unwrap();
    let keys: Vec<Vec<u8>> = merged.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, expected_keys);
}

struct OwnedPut(Vec<u8>);
