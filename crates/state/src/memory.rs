//! In-memory backend over a `BTreeMap`.
//!
//! Used by tests and by chains that do not persist state (read-only replay,
//! fixtures). Semantics are the reference for the RocksDB backend.

use crate::backend::{Backend, Entry};
use crate::Result;
use kestrel_types::Multihash;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// An ordered in-memory backend.
#[derive(Default)]
pub struct MemoryBackend {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    root_info: RwLock<Option<(Multihash, u64)>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn lower_bound(&self, key: &[u8]) -> Result<Option<Entry>> {
        Ok(self
            .map
            .read()
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn prev_before(&self, key: &[u8]) -> Result<Option<Entry>> {
        Ok(self
            .map
            .read()
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn first(&self) -> Result<Option<Entry>> {
        Ok(self
            .map
            .read()
            .iter()
            .next()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn last(&self) -> Result<Option<Entry>> {
        Ok(self
            .map
            .read()
            .iter()
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn len(&self) -> Result<u64> {
        Ok(self.map.read().len() as u64)
    }

    fn root_info(&self) -> Result<Option<(Multihash, u64)>> {
        Ok(self.root_info.read().clone())
    }

    fn set_root_info(&self, id: &Multihash, revision: u64) -> Result<()> {
        *self.root_info.write() = Some((id.clone(), revision));
        Ok(())
    }
}
