//! The fork-aware state database.
//!
//! Maintains the tree of state nodes over a shared backend: one root (the
//! committed state), a head (the best finalized tip), and any number of
//! in-flight forks. All tree mutations are serialized under a single mutex;
//! node handles obtained from the tree remain valid reads regardless of later
//! tree surgery.

use crate::backend::Backend;
use crate::delta::StateDelta;
use crate::node::StateNode;
use crate::{Result, StateError};
use kestrel_types::Multihash;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

struct Index {
    nodes: HashMap<Multihash, StateNode>,
    children: HashMap<Multihash, Vec<Multihash>>,
    root: Multihash,
    head: Multihash,
}

impl Index {
    fn node(&self, id: &Multihash) -> Option<StateNode> {
        self.nodes.get(id).cloned()
    }

    /// Whether `id` lies on the head's ancestor chain (head included).
    fn is_head_ancestor(&self, id: &Multihash) -> bool {
        let head = match self.nodes.get(&self.head) {
            Some(node) => node,
            None => return false,
        };
        let mut cursor = Some(head.delta().clone());
        while let Some(delta) = cursor {
            if delta.id() == id {
                return true;
            }
            cursor = delta.parent();
        }
        false
    }

    /// All ids in the subtree rooted at `id`, including `id`.
    fn subtree(&self, id: &Multihash) -> Vec<Multihash> {
        let mut queue = vec![id.clone()];
        let mut members = Vec::new();
        while let Some(current) = queue.pop() {
            if let Some(kids) = self.children.get(&current) {
                queue.extend(kids.iter().cloned());
            }
            members.push(current);
        }
        members
    }
}

/// A tree of state revisions over one backend.
pub struct StateDatabase {
    inner: Mutex<Index>,
}

impl StateDatabase {
    /// Opens the database over a backend.
    ///
    /// If the backend has never been seeded, `genesis_init` is invoked with a
    /// writable root node to install genesis values; the root is then sealed.
    pub fn open<F>(backend: Arc<dyn Backend>, genesis_init: F) -> Result<Self>
    where
        F: FnOnce(&StateNode) -> Result<()>,
    {
        let seeded = backend.root_info()?.is_some();
        let delta = StateDelta::new_root(backend.clone())?;
        let root_id = delta.id().clone();
        let revision = delta.revision();

        let root = StateNode::new(delta, seeded);
        if !seeded {
            info!("empty state backend, seeding genesis");
            genesis_init(&root)?;
            root.meta.write().finalized = true;
            backend.set_root_info(&root_id, revision)?;
        }

        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        info!(revision, "state database open at root {root_id}");

        Ok(Self {
            inner: Mutex::new(Index {
                nodes,
                children: HashMap::new(),
                root: root_id.clone(),
                head: root_id,
            }),
        })
    }

    /// Closes the database, dropping all in-memory nodes.
    pub fn close(self) {
        let inner = self.inner.into_inner();
        debug!("state database closed with {} live nodes", inner.nodes.len());
    }

    /// The committed root node.
    pub fn get_root(&self) -> StateNode {
        let inner = self.inner.lock();
        inner
            .node(&inner.root)
            .unwrap_or_else(|| unreachable!("root node is always indexed"))
    }

    /// The best finalized node per the minority-fork rule.
    pub fn get_head(&self) -> StateNode {
        let inner = self.inner.lock();
        inner
            .node(&inner.head)
            .unwrap_or_else(|| unreachable!("head node is always indexed"))
    }

    /// Looks up a node by id.
    pub fn get_node(&self, id: &Multihash) -> Option<StateNode> {
        self.inner.lock().node(id)
    }

    /// Looks up the node at `revision` on the head's ancestor chain.
    pub fn get_node_at_revision(&self, revision: u64) -> Option<StateNode> {
        let inner = self.inner.lock();
        let head = inner.node(&inner.head)?;
        if revision > head.delta().revision() {
            return None;
        }
        let mut cursor = Some(head.delta().clone());
        while let Some(delta) = cursor {
            if delta.revision() == revision {
                return inner.node(delta.id());
            }
            cursor = delta.parent();
        }
        None
    }

    /// Creates a writable child of `parent_id` with id `new_id`.
    ///
    /// Returns `None` when `new_id` already exists or `parent_id` is unknown.
    /// Creating the child freezes the parent against further writes.
    pub fn create_writable_node(
        &self,
        parent_id: &Multihash,
        new_id: &Multihash,
    ) -> Option<StateNode> {
        let mut inner = self.inner.lock();
        if inner.nodes.contains_key(new_id) {
            return None;
        }
        let parent = inner.node(parent_id)?;

        let delta = StateDelta::child(parent.delta().clone(), new_id.clone());
        let node = StateNode::new(delta, false);

        parent.meta.write().children += 1;
        inner
            .children
            .entry(parent_id.clone())
            .or_default()
            .push(new_id.clone());
        inner.nodes.insert(new_id.clone(), node.clone());
        debug!(
            revision = node.delta().revision(),
            "created writable node {new_id} under {parent_id}"
        );
        Some(node)
    }

    /// Irreversibly seals a node against writes.
    ///
    /// The head moves only when a strictly higher finalized revision appears;
    /// at equal revisions the first node to finalize keeps the head.
    pub fn finalize_node(&self, id: &Multihash) -> Result<()> {
        let mut inner = self.inner.lock();
        let node = inner.node(id).ok_or(StateError::StateNodeNotFound)?;
        node.meta.write().finalized = true;

        let head_revision = inner
            .node(&inner.head)
            .map(|head| head.delta().revision())
            .unwrap_or(0);
        if node.delta().revision() > head_revision {
            debug!(
                revision = node.delta().revision(),
                "head advanced to {id}"
            );
            inner.head = id.clone();
        }
        Ok(())
    }

    /// Commits `id`: folds its chain into the backend and makes it the new
    /// root, pruning every node that is not in its subtree.
    ///
    /// `id` must lie on the head's ancestor chain.
    pub fn commit_node(&self, id: &Multihash) -> Result<()> {
        let mut inner = self.inner.lock();
        let node = inner.node(id).ok_or(StateError::StateNodeNotFound)?;
        if !inner.is_head_ancestor(id) {
            return Err(StateError::CannotCommit("node is not an ancestor of head"));
        }

        node.delta().commit()?;

        let keep = inner.subtree(id);
        inner.nodes.retain(|node_id, _| keep.contains(node_id));
        inner.children.retain(|node_id, _| keep.contains(node_id));
        inner.root = id.clone();
        info!(
            revision = node.delta().revision(),
            live = inner.nodes.len(),
            "committed state node {id}"
        );
        Ok(())
    }

    /// Discards the subtree rooted at `id`.
    ///
    /// Fails with [`StateError::CannotDiscard`] when the subtree contains the
    /// head or when `id` is the root.
    pub fn discard_node(&self, id: &Multihash) -> Result<()> {
        let mut inner = self.inner.lock();
        let node = inner.node(id).ok_or(StateError::StateNodeNotFound)?;
        if *id == inner.root {
            return Err(StateError::CannotDiscard);
        }
        let doomed = inner.subtree(id);
        if doomed.contains(&inner.head) {
            return Err(StateError::CannotDiscard);
        }

        for member in &doomed {
            inner.nodes.remove(member);
            inner.children.remove(member);
        }
        let parent_id = node.delta().parent_id();
        if let Some(parent) = inner.node(&parent_id) {
            let mut meta = parent.meta.write();
            meta.children = meta.children.saturating_sub(1);
        }
        if let Some(siblings) = inner.children.get_mut(&parent_id) {
            siblings.retain(|sibling| sibling != id);
        }
        debug!("discarded {} node(s) under {id}", doomed.len());
        Ok(())
    }
}
