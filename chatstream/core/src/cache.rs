//! Recency cache with LRU eviction
//!
//! A bounded, thread-safe map that remembers the order in which entries
//! were last touched and evicts the least recently used one when full.
//!
//! # Design
//!
//! - **Explicit structure**: a `HashMap` from key to slot index plus a
//!   doubly linked list threaded through a slab of slots. Promotion and
//!   eviction are O(1) list operations
//! - **One lock**: every operation takes the single `parking_lot::Mutex`
//!   once. Nothing awaits or performs I/O while holding it
//! - **Reads promote**: `get`, `get_or_create` and `put` on an existing key
//!   move it to the most-recently-used end; `peek`, `contains_key`,
//!   `remove` and `clear` never reorder anything
//!
//! Values are returned as clones, so `V` is typically an `Arc` or a small
//! owned record.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::Mutex;

/// Default number of entries
pub const DEFAULT_CAPACITY: usize = 10;

/// End-of-list marker; never a valid slot index
const NIL: usize = usize::MAX;

/// Counters describing cache effectiveness
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Entries dropped to respect capacity
    pub evictions: u64,
    /// New keys added
    pub inserts: u64,
    /// Current number of entries
    pub len: usize,
    /// Maximum number of entries
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 when there were none
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Slab-backed list ordered least (head) to most (tail) recently used
struct RecencyList<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: usize,
    tail: usize,
    capacity: usize,
    stats: CacheStats,
}

impl<K, V> RecencyList<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            capacity,
            stats: CacheStats::default(),
        }
    }

    fn node(&self, idx: usize) -> Option<&Node<K, V>> {
        self.slots.get(idx)?.as_ref()
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node<K, V>> {
        self.slots.get_mut(idx)?.as_mut()
    }

    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.node(idx).map(|n| (n.prev, n.next)) else {
            return;
        };
        match self.node_mut(prev) {
            Some(node) => node.next = next,
            None => self.head = next,
        }
        match self.node_mut(next) {
            Some(node) => node.prev = prev,
            None => self.tail = prev,
        }
        if let Some(node) = self.node_mut(idx) {
            node.prev = NIL;
            node.next = NIL;
        }
    }

    fn push_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        if let Some(node) = self.node_mut(idx) {
            node.prev = old_tail;
            node.next = NIL;
        }
        match self.node_mut(old_tail) {
            Some(node) => node.next = idx,
            None => self.head = idx,
        }
        self.tail = idx;
    }

    fn promote(&mut self, idx: usize) {
        if self.tail != idx {
            self.unlink(idx);
            self.push_back(idx);
        }
    }

    fn lookup(&mut self, key: &K) -> Option<usize> {
        let idx = self.index.get(key).copied();
        match idx {
            Some(idx) => {
                self.stats.hits += 1;
                self.promote(idx);
            }
            None => self.stats.misses += 1,
        }
        idx
    }

    fn value(&self, idx: usize) -> Option<&V> {
        self.node(idx).map(|n| &n.value)
    }

    /// Insert or replace; returns the entry evicted to make room
    fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(node) = self.node_mut(idx) {
                node.value = value;
            }
            self.promote(idx);
            return None;
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_back(idx);
        self.stats.inserts += 1;

        if self.index.len() > self.capacity {
            self.stats.evictions += 1;
            return self.take(self.head);
        }
        None
    }

    fn take(&mut self, idx: usize) -> Option<(K, V)> {
        self.unlink(idx);
        let node = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Entries from least to most recently used
    fn iter(&self) -> impl Iterator<Item = &Node<K, V>> {
        std::iter::successors(self.node(self.head), |node| self.node(node.next))
    }
}

/// Bounded thread-safe LRU map
///
/// # Example
///
/// ```
/// use chatstream_core::cache::RecencyCache;
///
/// let cache = RecencyCache::new(2);
/// cache.put("a", 1);
/// cache.put("b", 2);
/// cache.get(&"a");
/// cache.put("c", 3); // evicts "b"
/// assert_eq!(cache.keys(), vec!["a", "c"]);
/// ```
pub struct RecencyCache<K, V> {
    inner: Mutex<RecencyList<K, V>>,
}

impl<K, V> RecencyCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (at least 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RecencyList::new(capacity.max(1))),
        }
    }

    /// Look up `key`, promoting it to most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let idx = inner.lookup(key)?;
        inner.value(idx).cloned()
    }

    /// Look up `key` without changing its recency
    pub fn peek(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let idx = *inner.index.get(key)?;
        inner.value(idx).cloned()
    }

    /// Whether `key` is present; does not change recency
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().index.contains_key(key)
    }

    /// Return the cached value for `key`, creating it on a miss
    ///
    /// The check and the insert happen under one lock acquisition, so
    /// `factory` runs at most once per miss even under contention. It runs
    /// while the lock is held and must not call back into this cache.
    pub fn get_or_create<F>(&self, key: K, factory: F) -> V
    where
        F: FnOnce(&K) -> V,
    {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.lookup(&key) {
            if let Some(value) = inner.value(idx) {
                return value.clone();
            }
        }
        let value = factory(&key);
        inner.insert(key, value.clone());
        value
    }

    /// Insert or replace `key`, promoting it to most recently used
    ///
    /// Returns the entry evicted to stay within capacity, if any.
    pub fn put(&self, key: K, value: V) -> Option<(K, V)> {
        self.inner.lock().insert(key, value)
    }

    /// Remove `key`, returning its value
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let idx = *inner.index.get(key)?;
        inner.take(idx).map(|(_, value)| value)
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Keys ordered least to most recently used
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().iter().map(|node| node.key.clone()).collect()
    }

    /// Independent copy of all entries, least to most recently used
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.inner
            .lock()
            .iter()
            .map(|node| (node.key.clone(), node.value.clone()))
            .collect()
    }

    /// Effectiveness counters
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            len: inner.index.len(),
            capacity: inner.capacity,
            ..inner.stats
        }
    }
}

impl<K, V> Default for RecencyCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<K, V> fmt::Debug for RecencyCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RecencyCache")
            .field("len", &inner.index.len())
            .field("capacity", &inner.capacity)
            .finish()
    }
}
