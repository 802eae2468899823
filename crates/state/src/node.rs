//! State node handles.
//!
//! A [`StateNode`] is a handle onto one node of the revision tree. Handles
//! are cheap to clone and keep the node's lineage alive: the underlying delta
//! holds an `Arc` to its parent all the way to the root, so a reader that
//! retains a handle can keep resolving reads even after the tree logically
//! discards the branch.
//!
//! An [`AnonymousStateNode`] is a scratch child that never appears in the
//! tree. It scopes one transaction: committing squashes its writes into the
//! parent, dropping it leaves the parent byte-identical.

use crate::delta::StateDelta;
use crate::merge::MergeIter;
use crate::{Result, StateError, MAX_OBJECT_SIZE};
use kestrel_types::{Multihash, ObjectSpace};
use parking_lot::RwLock;
use std::sync::Arc;

/// Tree bookkeeping shared between a node handle and the database index.
#[derive(Debug, Default)]
pub(crate) struct NodeMeta {
    pub finalized: bool,
    pub children: u32,
}

/// Read and write access to one state revision, keyed by object space.
pub trait StateAccess: Send + Sync {
    /// The node id.
    fn id(&self) -> Multihash;

    /// The node revision.
    fn revision(&self) -> u64;

    /// The parent node id, or the zero multihash at the root.
    fn parent_id(&self) -> Multihash;

    /// Whether writes are currently accepted.
    fn is_writable(&self) -> bool;

    /// Reads the object at `(space, key)` through the delta chain.
    fn get_object(&self, space: &ObjectSpace, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// The first object in `space` with key strictly greater than `key`.
    fn get_next_object(&self, space: &ObjectSpace, key: &[u8])
        -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// The last object in `space` with key strictly less than `key`.
    fn get_prev_object(&self, space: &ObjectSpace, key: &[u8])
        -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Writes the object at `(space, key)`; returns whether it existed.
    fn put_object(&self, space: &ObjectSpace, key: &[u8], value: &[u8]) -> Result<bool>;

    /// Removes the object at `(space, key)`.
    fn remove_object(&self, space: &ObjectSpace, key: &[u8]) -> Result<()>;

    /// Deterministic digest of this revision's own writes and tombstones.
    fn merkle_root(&self) -> Result<Multihash>;

    /// Spawns an anonymous scratch child over this node's delta.
    fn create_anonymous_child(&self) -> AnonymousStateNode;
}

fn scan_next(
    delta: &Arc<StateDelta>,
    space: &ObjectSpace,
    key: &[u8],
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let prefix = space.object_key(&[]);
    let mut iter = MergeIter::new(delta.clone());
    let mut successor = space.object_key(key);
    successor.push(0x00);
    match iter.seek(&successor)? {
        Some((composite, value)) if composite.starts_with(&prefix) => {
            Ok(Some((composite[prefix.len()..].to_vec(), value)))
        }
        _ => Ok(None),
    }
}

fn scan_prev(
    delta: &Arc<StateDelta>,
    space: &ObjectSpace,
    key: &[u8],
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let prefix = space.object_key(&[]);
    let mut iter = MergeIter::new(delta.clone());
    // Position at the first entry >= the target, then step back once.
    iter.seek(&space.object_key(key))?;
    match iter.prev()? {
        Some((composite, value)) if composite.starts_with(&prefix) => {
            Ok(Some((composite[prefix.len()..].to_vec(), value)))
        }
        _ => Ok(None),
    }
}

fn check_value_size(value: &[u8]) -> Result<()> {
    if value.len() > MAX_OBJECT_SIZE {
        return Err(StateError::ObjectTooLarge {
            size: value.len(),
            limit: MAX_OBJECT_SIZE,
        });
    }
    Ok(())
}

/// A handle onto one node of the revision tree.
#[derive(Clone)]
pub struct StateNode {
    pub(crate) delta: Arc<StateDelta>,
    pub(crate) meta: Arc<RwLock<NodeMeta>>,
}

impl StateNode {
    pub(crate) fn new(delta: Arc<StateDelta>, finalized: bool) -> Self {
        Self {
            delta,
            meta: Arc::new(RwLock::new(NodeMeta {
                finalized,
                children: 0,
            })),
        }
    }

    pub(crate) fn delta(&self) -> &Arc<StateDelta> {
        &self.delta
    }

    /// Whether the node has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.meta.read().finalized
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(StateError::NodeNotWritable)
        }
    }
}

impl StateAccess for StateNode {
    fn id(&self) -> Multihash {
        self.delta.id().clone()
    }

    fn revision(&self) -> u64 {
        self.delta.revision()
    }

    fn parent_id(&self) -> Multihash {
        self.delta.parent_id()
    }

    fn is_writable(&self) -> bool {
        let meta = self.meta.read();
        !meta.finalized && meta.children == 0
    }

    fn get_object(&self, space: &ObjectSpace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.delta.find(&space.object_key(key))
    }

    fn get_next_object(
        &self,
        space: &ObjectSpace,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        scan_next(&self.delta, space, key)
    }

    fn get_prev_object(
        &self,
        space: &ObjectSpace,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        scan_prev(&self.delta, space, key)
    }

    fn put_object(&self, space: &ObjectSpace, key: &[u8], value: &[u8]) -> Result<bool> {
        self.ensure_writable()?;
        check_value_size(value)?;
        let composite = space.object_key(key);
        let existed = self.delta.find(&composite)?.is_some();
        self.delta.put(&composite, value)?;
        Ok(existed)
    }

    fn remove_object(&self, space: &ObjectSpace, key: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.delta.erase(&space.object_key(key))
    }

    fn merkle_root(&self) -> Result<Multihash> {
        self.delta.merkle_root()
    }

    fn create_anonymous_child(&self) -> AnonymousStateNode {
        AnonymousStateNode {
            delta: StateDelta::child(self.delta.clone(), self.delta.id().clone()),
            parent: self.clone(),
        }
    }
}

/// A scratch child node that never joins the revision tree.
pub struct AnonymousStateNode {
    delta: Arc<StateDelta>,
    parent: StateNode,
}

impl AnonymousStateNode {
    /// The tree node this scratch child was spawned from.
    pub fn parent_node(&self) -> &StateNode {
        &self.parent
    }

    /// Squashes the accumulated writes into the parent.
    pub fn commit(&self) -> Result<()> {
        self.delta.squash()
    }
}

impl StateAccess for AnonymousStateNode {
    fn id(&self) -> Multihash {
        // Anonymous nodes are invisible in the tree; report the parent's id.
        self.parent.id()
    }

    fn revision(&self) -> u64 {
        self.parent.revision()
    }

    fn parent_id(&self) -> Multihash {
        self.parent.parent_id()
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn get_object(&self, space: &ObjectSpace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.delta.find(&space.object_key(key))
    }

    fn get_next_object(
        &self,
        space: &ObjectSpace,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        scan_next(&self.delta, space, key)
    }

    fn get_prev_object(
        &self,
        space: &ObjectSpace,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        scan_prev(&self.delta, space, key)
    }

    fn put_object(&self, space: &ObjectSpace, key: &[u8], value: &[u8]) -> Result<bool> {
        check_value_size(value)?;
        let composite = space.object_key(key);
        let existed = self.delta.find(&composite)?.is_some();
        self.delta.put(&composite, value)?;
        Ok(existed)
    }

    fn remove_object(&self, space: &ObjectSpace, key: &[u8]) -> Result<()> {
        self.delta.erase(&space.object_key(key))
    }

    fn merkle_root(&self) -> Result<Multihash> {
        self.delta.merkle_root()
    }

    fn create_anonymous_child(&self) -> AnonymousStateNode {
        AnonymousStateNode {
            delta: StateDelta::child(self.delta.clone(), self.delta.id().clone()),
            parent: self.parent.clone(),
        }
    }
}
