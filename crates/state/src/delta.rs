//! Single-revision state overlays.
//!
//! A [`StateDelta`] records one revision's writes and tombstones on top of a
//! parent delta, or wraps the persistent backend when it is the root of the
//! chain. Writes and tombstones share one ordered map (`Some` = write,
//! `None` = tombstone), which makes the delta contract fall out directly:
//! a write clears any tombstone for the key and vice versa.

use crate::backend::Backend;
use crate::{Result, StateError};
use kestrel_crypto::merkle;
use kestrel_types::codec::Writer;
use kestrel_types::{multicodec, Multihash};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// A key's fate within a single delta: a written value or a tombstone.
pub type Decision = Option<Vec<u8>>;

const PUT_TAG: u8 = 0x01;
const ERASE_TAG: u8 = 0x02;

/// A single-revision overlay of writes and tombstones.
pub struct StateDelta {
    parent: RwLock<Option<Arc<StateDelta>>>,
    backend: RwLock<Option<Arc<dyn Backend>>>,
    id: Multihash,
    revision: u64,
    entries: RwLock<BTreeMap<Vec<u8>, Decision>>,
    merkle_root: RwLock<Option<Multihash>>,
}

impl StateDelta {
    /// Creates the root delta over a backend, resuming the persisted root
    /// identity if one exists.
    pub fn new_root(backend: Arc<dyn Backend>) -> Result<Arc<Self>> {
        let (id, revision) = backend
            .root_info()?
            .unwrap_or_else(|| (Multihash::zero(multicodec::SHA2_256), 0));
        Ok(Arc::new(Self {
            parent: RwLock::new(None),
            backend: RwLock::new(Some(backend)),
            id,
            revision,
            entries: RwLock::new(BTreeMap::new()),
            merkle_root: RwLock::new(None),
        }))
    }

    /// Creates a child delta one revision past `parent`.
    pub fn child(parent: Arc<StateDelta>, id: Multihash) -> Arc<Self> {
        let revision = parent.revision + 1;
        Arc::new(Self {
            parent: RwLock::new(Some(parent)),
            backend: RwLock::new(None),
            id,
            revision,
            entries: RwLock::new(BTreeMap::new()),
            merkle_root: RwLock::new(None),
        })
    }

    /// The delta's node id.
    pub fn id(&self) -> &Multihash {
        &self.id
    }

    /// The delta's revision; one past the parent's, zero at the root.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The parent's node id, or the zero multihash at the root.
    pub fn parent_id(&self) -> Multihash {
        self.parent
            .read()
            .as_ref()
            .map(|p| p.id.clone())
            .unwrap_or_else(|| Multihash::zero(multicodec::SHA2_256))
    }

    /// The parent delta, if any.
    pub fn parent(&self) -> Option<Arc<StateDelta>> {
        self.parent.read().clone()
    }

    /// Whether this delta is the chain root.
    pub fn is_root(&self) -> bool {
        self.parent.read().is_none()
    }

    /// Whether this delta carries any writes or tombstones.
    pub fn is_modified(&self) -> bool {
        !self.entries.read().is_empty()
    }

    fn root_backend(&self) -> Result<Arc<dyn Backend>> {
        self.backend
            .read()
            .clone()
            .ok_or_else(|| StateError::BackendFailure("delta has no backend".into()))
    }

    /// Writes `value` at `key`, clearing any tombstone.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.is_root() {
            return self.root_backend()?.put(key, value);
        }
        self.entries
            .write()
            .insert(key.to_vec(), Some(value.to_vec()));
        *self.merkle_root.write() = None;
        Ok(())
    }

    /// Records a tombstone at `key`, clearing any local write.
    pub fn erase(&self, key: &[u8]) -> Result<()> {
        if self.is_root() {
            return self.root_backend()?.delete(key);
        }
        self.entries.write().insert(key.to_vec(), None);
        *self.merkle_root.write() = None;
        Ok(())
    }

    /// Resolves `key` through this delta and its ancestors.
    ///
    /// The newest delta mentioning the key decides: a local write returns its
    /// value, a tombstone returns `None`, an unmentioned key defers to the
    /// parent and finally to the backend.
    pub fn find(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.decision(key)? {
            Some(decision) => Ok(decision),
            None => match self.parent() {
                Some(parent) => parent.find(key),
                None => Ok(None),
            },
        }
    }

    /// This delta's own verdict on `key`, without consulting ancestors.
    ///
    /// `None` means the delta does not mention the key at all.
    pub fn decision(&self, key: &[u8]) -> Result<Option<Decision>> {
        if self.is_root() {
            return Ok(self.root_backend()?.get(key)?.map(Some));
        }
        Ok(self.entries.read().get(key).cloned())
    }

    /// First locally-mentioned key `>= key`, with its decision.
    pub fn local_lower_bound(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Decision)>> {
        if self.is_root() {
            return Ok(self.root_backend()?.lower_bound(key)?.map(|(k, v)| (k, Some(v))));
        }
        Ok(self
            .entries
            .read()
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(k, d)| (k.clone(), d.clone())))
    }

    /// First locally-mentioned key `> key`, with its decision.
    pub fn local_next_after(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Decision)>> {
        if self.is_root() {
            return Ok(self.root_backend()?.next_after(key)?.map(|(k, v)| (k, Some(v))));
        }
        Ok(self
            .entries
            .read()
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, d)| (k.clone(), d.clone())))
    }

    /// Last locally-mentioned key `< key`, with its decision.
    pub fn local_prev_before(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Decision)>> {
        if self.is_root() {
            return Ok(self.root_backend()?.prev_before(key)?.map(|(k, v)| (k, Some(v))));
        }
        Ok(self
            .entries
            .read()
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .map(|(k, d)| (k.clone(), d.clone())))
    }

    /// Last locally-mentioned key, with its decision.
    pub fn local_last(&self) -> Result<Option<(Vec<u8>, Decision)>> {
        if self.is_root() {
            return Ok(self.root_backend()?.last()?.map(|(k, v)| (k, Some(v))));
        }
        Ok(self
            .entries
            .read()
            .iter()
            .next_back()
            .map(|(k, d)| (k.clone(), d.clone())))
    }

    /// Merges this delta into its parent.
    ///
    /// The parent's map is override-merged with this delta's map; for every
    /// key, `find` through the parent afterwards answers exactly as `find`
    /// through this delta did before. A root delta cannot be squashed.
    pub fn squash(&self) -> Result<()> {
        let parent = match self.parent() {
            Some(parent) => parent,
            None => return Ok(()),
        };

        let entries = std::mem::take(&mut *self.entries.write());
        if parent.is_root() {
            let backend = parent.root_backend()?;
            for (key, decision) in entries {
                match decision {
                    Some(value) => backend.put(&key, &value)?,
                    None => backend.delete(&key)?,
                }
            }
        } else {
            let mut parent_entries = parent.entries.write();
            for (key, decision) in entries {
                parent_entries.insert(key, decision);
            }
            *parent.merkle_root.write() = None;
        }
        *self.merkle_root.write() = None;
        Ok(())
    }

    /// Folds the whole chain from this delta down to the root into the
    /// backend, oldest first, and turns this delta into the new root.
    pub fn commit(&self) -> Result<()> {
        if self.is_root() {
            return Ok(());
        }

        // Collect self -> root, then apply overlays oldest-first.
        let mut chain: Vec<Arc<StateDelta>> = Vec::new();
        let mut cursor = self.parent();
        while let Some(delta) = cursor {
            cursor = delta.parent();
            chain.push(delta);
        }
        let root = chain.pop().ok_or(StateError::StateNodeNotFound)?;
        debug_assert!(root.is_root());
        let backend = root.root_backend()?;

        for delta in chain.into_iter().rev() {
            delta.apply_to(&backend)?;
        }
        self.apply_to(&backend)?;

        backend.set_root_info(&self.id, self.revision)?;
        *self.backend.write() = Some(backend);
        *self.parent.write() = None;
        self.entries.write().clear();
        *self.merkle_root.write() = None;
        Ok(())
    }

    fn apply_to(&self, backend: &Arc<dyn Backend>) -> Result<()> {
        let entries = self.entries.read();
        for (key, decision) in entries.iter() {
            match decision {
                Some(value) => backend.put(key, value)?,
                None => backend.delete(key)?,
            }
        }
        Ok(())
    }

    /// Deterministic digest of this delta's own writes and tombstones.
    ///
    /// Leaves are the sorted `(key, op, value)` triples of this delta alone;
    /// the value is memoized and recomputed only after a mutation.
    pub fn merkle_root(&self) -> Result<Multihash> {
        if let Some(root) = self.merkle_root.read().clone() {
            return Ok(root);
        }

        let entries = self.entries.read();
        let mut leaves = Vec::with_capacity(entries.len());
        for (key, decision) in entries.iter() {
            let mut writer = Writer::new();
            writer.write_bytes(key);
            match decision {
                Some(value) => {
                    writer.write_u8(PUT_TAG);
                    writer.write_bytes(value);
                }
                None => {
                    writer.write_u8(ERASE_TAG);
                    writer.write_bytes(&[]);
                }
            }
            leaves.push(Multihash::hash(multicodec::SHA2_256, &writer.into_bytes())?);
        }
        drop(entries);

        let root = merkle::merkle_root(multicodec::SHA2_256, &leaves)?;
        *self.merkle_root.write() = Some(root.clone());
        Ok(root)
    }
}
