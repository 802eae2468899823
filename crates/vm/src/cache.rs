//! Fixed-capacity LRU cache of compiled modules.
//!
//! Compiled modules are immutable artifacts; `get` hands out a clone of the
//! cached handle so every invocation instantiates its own fresh state. The
//! recency list is an intrusive doubly-linked list over slab indices rather
//! than iterators into a collection, so promoting an entry never invalidates
//! another entry's position.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;
use wasmtime::Module;

const NIL: usize = usize::MAX;

struct CacheEntry {
    key: Vec<u8>,
    module: Module,
    prev: usize,
    next: usize,
}

struct CacheInner {
    capacity: usize,
    map: HashMap<Vec<u8>, usize>,
    slab: Vec<Option<CacheEntry>>,
    free: Vec<usize>,
    /// Most recently used entry
    head: usize,
    /// Least recently used entry
    tail: usize,
}

impl CacheInner {
    fn entry(&self, index: usize) -> &CacheEntry {
        self.slab[index].as_ref().unwrap_or_else(|| unreachable!("linked entry is live"))
    }

    fn entry_mut(&mut self, index: usize) -> &mut CacheEntry {
        self.slab[index].as_mut().unwrap_or_else(|| unreachable!("linked entry is live"))
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let entry = self.entry(index);
            (entry.prev, entry.next)
        };
        match prev {
            NIL => self.head = next,
            _ => self.entry_mut(prev).next = next,
        }
        match next {
            NIL => self.tail = prev,
            _ => self.entry_mut(next).prev = prev,
        }
    }

    fn push_front(&mut self, index: usize) {
        let old_head = self.head;
        {
            let entry = self.entry_mut(index);
            entry.prev = NIL;
            entry.next = old_head;
        }
        if old_head != NIL {
            self.entry_mut(old_head).prev = index;
        }
        self.head = index;
        if self.tail == NIL {
            self.tail = index;
        }
    }

    fn evict_tail(&mut self) {
        let index = self.tail;
        if index == NIL {
            return;
        }
        self.unlink(index);
        if let Some(entry) = self.slab[index].take() {
            debug!("evicting cached module ({} bytes of key)", entry.key.len());
            self.map.remove(&entry.key);
        }
        self.free.push(index);
    }
}

/// A mutex-protected LRU over `(module key -> compiled module)`.
pub struct ModuleCache {
    inner: Mutex<CacheInner>,
}

impl ModuleCache {
    /// Creates a cache holding at most `capacity` modules.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                capacity: capacity.max(1),
                map: HashMap::new(),
                slab: Vec::new(),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
            }),
        }
    }

    /// Fetches a fresh handle to the cached module, promoting it to most
    /// recently used. Returns `None` on a miss.
    pub fn get(&self, key: &[u8]) -> Option<Module> {
        let mut inner = self.inner.lock();
        let index = *inner.map.get(key)?;
        inner.unlink(index);
        inner.push_front(index);
        Some(inner.entry(index).module.clone())
    }

    /// Inserts a compiled module, evicting the least recently used entry at
    /// capacity. Re-inserting an existing key replaces and promotes it.
    pub fn put(&self, key: &[u8], module: Module) {
        let mut inner = self.inner.lock();
        if let Some(&index) = inner.map.get(key) {
            inner.entry_mut(index).module = module;
            inner.unlink(index);
            inner.push_front(index);
            return;
        }

        if inner.map.len() >= inner.capacity {
            inner.evict_tail();
        }

        let entry = CacheEntry {
            key: key.to_vec(),
            module,
            prev: NIL,
            next: NIL,
        };
        let index = match inner.free.pop() {
            Some(index) => {
                inner.slab[index] = Some(entry);
                index
            }
            None => {
                inner.slab.push(Some(entry));
                inner.slab.len() - 1
            }
        };
        inner.map.insert(key.to_vec(), index);
        inner.push_front(index);
    }

    /// Number of cached modules.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Engine;

    fn module(engine: &Engine) -> Module {
        Module::new(engine, "(module)").unwrap()
    }

    #[test]
    fn test_get_miss_then_hit() {
        let engine = Engine::default();
        let cache = ModuleCache::new(4);
        assert!(cache.get(b"a").is_none());
        cache.put(b"a", module(&engine));
        assert!(cache.get(b"a").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_eviction_is_strict_lru() {
        let engine = Engine::default();
        let cache = ModuleCache::new(2);
        cache.put(b"a", module(&engine));
        cache.put(b"b", module(&engine));
        // Touch `a` so `b` becomes least recent.
        cache.get(b"a").unwrap();
        cache.put(b"c", module(&engine));

        assert!(cache.get(b"a").is_some());
        assert!(cache.get(b"b").is_none());
        assert!(cache.get(b"c").is_some());
    }

    #[test]
    fn test_put_promotes_existing_key() {
        let engine = Engine::default();
        let cache = ModuleCache::new(2);
        cache.put(b"a", module(&engine));
        cache.put(b"b", module(&engine));
        // Re-put `a`, then overflow: `b` must go.
        cache.put(b"a", module(&engine));
        cache.put(b"c", module(&engine));

        assert!(cache.get(b"a").is_some());
        assert!(cache.get(b"b").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_slot_reuse_after_eviction() {
        let engine = Engine::default();
        let cache = ModuleCache::new(1);
        for key in [b"a", b"b", b"c", b"d"] {
            cache.put(key, module(&engine));
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.get(b"d").is_some());
    }
}
