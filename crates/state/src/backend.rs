//! The ordered key-value backend abstraction.
//!
//! A backend stores the committed root state. Keys are ordered
//! lexicographically; traversal is expressed through stateless positioning
//! queries (`lower_bound`, `next_after`, `prev_before`) rather than stateful
//! cursors, so callers are never invalidated by interleaved writes - each
//! step re-seeks from an explicit key.
//!
//! A failed read returns `Ok(None)`; only real I/O faults surface as
//! [`StateError::BackendFailure`](crate::StateError::BackendFailure).

use crate::Result;
use kestrel_types::Multihash;

/// An ordered key-value entry.
pub type Entry = (Vec<u8>, Vec<u8>);

/// An ordered key-value store holding the committed root state.
pub trait Backend: Send + Sync {
    /// Reads the value stored at `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Stores `value` at `key`, replacing any existing value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// The first entry with key `>= key`, if any.
    fn lower_bound(&self, key: &[u8]) -> Result<Option<Entry>>;

    /// The first entry with key `> key`, if any.
    ///
    /// The immediate lexicographic successor of `key` is `key ++ 0x00`, so
    /// this is `lower_bound` of that successor.
    fn next_after(&self, key: &[u8]) -> Result<Option<Entry>> {
        let mut successor = Vec::with_capacity(key.len() + 1);
        successor.extend_from_slice(key);
        successor.push(0x00);
        self.lower_bound(&successor)
    }

    /// The last entry with key `< key`, if any.
    fn prev_before(&self, key: &[u8]) -> Result<Option<Entry>>;

    /// The first entry in key order, if any.
    fn first(&self) -> Result<Option<Entry>>;

    /// The last entry in key order, if any.
    fn last(&self) -> Result<Option<Entry>>;

    /// Number of stored entries.
    fn len(&self) -> Result<u64>;

    /// Whether the backend holds no entries.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The identity of the committed root: its node id and revision.
    ///
    /// `None` on a freshly created backend that has never been seeded.
    fn root_info(&self) -> Result<Option<(Multihash, u64)>>;

    /// Records the identity of the committed root.
    fn set_root_info(&self, id: &Multihash, revision: u64) -> Result<()>;
}
