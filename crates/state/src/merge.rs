//! Ordered iteration over the merged view of a delta chain.
//!
//! Given a chain of deltas (newest first, root last), the merged view
//! presents, for every key, the decision of the newest delta that mentions
//! it, skipping keys whose newest decision is a tombstone. The iterator is
//! bidirectional and re-seeks from its current key on every step, so it stays
//! valid across interleaved writes to the underlying deltas.
//!
//! Composite keys order exactly as their byte encoding, so secondary
//! orderings expressed by key construction (`by_b || by_a` tuples in the key
//! bytes) iterate in the intended order with no special handling here.

use crate::delta::StateDelta;
use crate::Result;
use std::sync::Arc;

/// An ordered key-value entry of the merged view.
pub type Entry = (Vec<u8>, Vec<u8>);

#[derive(Debug, Clone)]
enum Position {
    Start,
    At(Vec<u8>),
    End,
}

/// A bidirectional iterator over the merged view of a delta chain.
pub struct MergeIter {
    /// Chain layers, newest first; the root is last.
    layers: Vec<Arc<StateDelta>>,
    position: Position,
}

impl MergeIter {
    /// Builds an iterator over `head` and all of its ancestors.
    ///
    /// The iterator starts before the first entry; call [`MergeIter::next`]
    /// or [`MergeIter::seek`] to position it.
    pub fn new(head: Arc<StateDelta>) -> Self {
        let mut layers = Vec::new();
        let mut cursor = Some(head);
        while let Some(delta) = cursor {
            cursor = delta.parent();
            layers.push(delta);
        }
        Self {
            layers,
            position: Position::Start,
        }
    }

    /// Resolves `key` against the newest layer that mentions it.
    fn resolve(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        for layer in &self.layers {
            if let Some(decision) = layer.decision(key)? {
                return Ok(decision);
            }
        }
        Ok(None)
    }

    /// Smallest mentioned key `>= key` across all layers, live or not.
    fn min_lower_bound(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut best: Option<Vec<u8>> = None;
        for layer in &self.layers {
            if let Some((candidate, _)) = layer.local_lower_bound(key)? {
                if best.as_ref().map_or(true, |b| candidate < *b) {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    /// Smallest mentioned key `> key` across all layers, live or not.
    fn min_next_after(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut best: Option<Vec<u8>> = None;
        for layer in &self.layers {
            if let Some((candidate, _)) = layer.local_next_after(key)? {
                if best.as_ref().map_or(true, |b| candidate < *b) {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    /// Largest mentioned key `< key` across all layers, live or not.
    fn max_prev_before(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut best: Option<Vec<u8>> = None;
        for layer in &self.layers {
            if let Some((candidate, _)) = layer.local_prev_before(key)? {
                if best.as_ref().map_or(true, |b| candidate > *b) {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    /// Largest mentioned key across all layers, live or not.
    fn max_last(&self) -> Result<Option<Vec<u8>>> {
        let mut best: Option<Vec<u8>> = None;
        for layer in &self.layers {
            if let Some((candidate, _)) = layer.local_last()? {
                if best.as_ref().map_or(true, |b| candidate > *b) {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    /// Walks forward from `candidate` until a live (non-tombstoned) key is
    /// found, and positions the iterator there.
    fn settle_forward(&mut self, mut candidate: Option<Vec<u8>>) -> Result<Option<Entry>> {
        while let Some(key) = candidate {
            if let Some(value) = self.resolve(&key)? {
                self.position = Position::At(key.clone());
                return Ok(Some((key, value)));
            }
            candidate = self.min_next_after(&key)?;
        }
        self.position = Position::End;
        Ok(None)
    }

    /// Walks backward from `candidate` until a live key is found, and
    /// positions the iterator there.
    fn settle_backward(&mut self, mut candidate: Option<Vec<u8>>) -> Result<Option<Entry>> {
        while let Some(key) = candidate {
            if let Some(value) = self.resolve(&key)? {
                self.position = Position::At(key.clone());
                return Ok(Some((key, value)));
            }
            candidate = self.max_prev_before(&key)?;
        }
        self.position = Position::Start;
        Ok(None)
    }

    /// Positions at the first live entry with key `>= key`.
    pub fn seek(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        let candidate = self.min_lower_bound(key)?;
        self.settle_forward(candidate)
    }

    /// Positions at the first live entry.
    pub fn seek_first(&mut self) -> Result<Option<Entry>> {
        let candidate = self.min_lower_bound(&[])?;
        self.settle_forward(candidate)
    }

    /// Positions at the last live entry.
    pub fn seek_last(&mut self) -> Result<Option<Entry>> {
        let candidate = self.max_last()?;
        self.settle_backward(candidate)
    }

    /// Advances to the next live entry.
    pub fn next(&mut self) -> Result<Option<Entry>> {
        match self.position.clone() {
            Position::Start => self.seek_first(),
            Position::At(key) => {
                let candidate = self.min_next_after(&key)?;
                self.settle_forward(candidate)
            }
            Position::End => Ok(None),
        }
    }

    /// Steps back to the previous live entry.
    pub fn prev(&mut self) -> Result<Option<Entry>> {
        match self.position.clone() {
            Position::Start => Ok(None),
            Position::At(key) => {
                let candidate = self.max_prev_before(&key)?;
                self.settle_backward(candidate)
            }
            Position::End => self.seek_last(),
        }
    }

    /// Drains the remaining entries into a vector, in order.
    pub fn collect_forward(mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next()? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
