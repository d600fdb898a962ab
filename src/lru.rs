//! Bounded least-recently-used storage.
//!
//! [`LruStore`] keeps at most `capacity` entries and evicts the entry that
//! was touched longest ago when a new key would overflow it. Entries live in
//! an arena of slots linked by integer indices (most recent at the head,
//! least recent at the tail) with a hash map from key to slot, so lookups,
//! promotions and evictions are all O(1).
//!
//! All operations take a single internal lock and are atomic with respect
//! to each other.
//!
//! # Example
//!
//! ```
//! use framecache::LruStore;
//!
//! let store: LruStore<u32, &str> = LruStore::new(2)?;
//! store.put(1, "one");
//! store.put(2, "two");
//! store.get(&1);
//! store.put(3, "three"); // evicts 2
//! assert_eq!(store.keys(), vec![3, 1]);
//! # Ok::<(), framecache::FrameCacheError>(())
//! ```

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::hash::Hash;

use parking_lot::Mutex;

use crate::entry::{CacheKey, CachedFrame};
use crate::error::FrameCacheError;

const NIL: usize = usize::MAX;

/// Thread-safe, fixed-capacity LRU map.
///
/// Defaults to the key and value types used by the frame cache, but works
/// with any clonable key/value pair.
pub struct LruStore<K = CacheKey, V = CachedFrame> {
    arena: Mutex<Arena<K, V>>,
    capacity: usize,
}

struct Slot<K, V> {
    entry: Option<(K, V)>,
    prev: usize,
    next: usize,
}

struct Arena<K, V> {
    slots: Vec<Slot<K, V>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: usize,
    tail: usize,
}

impl<K, V> LruStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty store holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns [`FrameCacheError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, FrameCacheError> {
        if capacity == 0 {
            return Err(FrameCacheError::InvalidCapacity);
        }
        Ok(Self {
            arena: Mutex::new(Arena::with_capacity(capacity)),
            capacity,
        })
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.arena.lock().get(key)
    }

    /// Look up `key` without touching the recency order.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.arena.lock().peek(key)
    }

    /// Returns `true` if `key` is present. Does not promote.
    pub fn contains(&self, key: &K) -> bool {
        self.arena.lock().index.contains_key(key)
    }

    /// Insert or replace `key`, making it most recently used.
    ///
    /// When a new key arrives at a full store, the least recently used
    /// entry is evicted first and returned.
    pub fn put(&self, key: K, value: V) -> Option<(K, V)> {
        let mut arena = self.arena.lock();

        if let Some(&slot) = arena.index.get(&key) {
            arena.slots[slot].entry = Some((key, value));
            arena.promote(slot);
            return None;
        }

        let mut evicted = None;
        while arena.index.len() >= self.capacity {
            match arena.pop_lru() {
                Some(entry) => evicted = Some(entry),
                None => break,
            }
        }

        let slot = arena.allocate(key.clone(), value);
        arena.index.insert(key, slot);
        arena.attach_front(slot);
        evicted
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut arena = self.arena.lock();
        let slot = *arena.index.get(key)?;
        arena.release(slot).map(|(_, value)| value)
    }

    /// Remove every entry whose key satisfies `predicate`.
    ///
    /// Returns the number of entries removed.
    pub fn remove_matching<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let mut arena = self.arena.lock();
        let doomed: Vec<usize> = arena
            .index
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(_, &slot)| slot)
            .collect();

        for &slot in &doomed {
            arena.release(slot);
        }
        doomed.len()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut arena = self.arena.lock();
        *arena = Arena::with_capacity(self.capacity);
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.arena.lock().index.len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the keys, most recently used first.
    pub fn keys(&self) -> Vec<K> {
        let arena = self.arena.lock();
        let mut keys = Vec::with_capacity(arena.index.len());
        let mut cursor = arena.head;
        while cursor != NIL {
            let slot = &arena.slots[cursor];
            if let Some((key, _)) = &slot.entry {
                keys.push(key.clone());
            }
            cursor = slot.next;
        }
        keys
    }
}

impl<K, V> Debug for LruStore<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LruStore")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl<K, V> Arena<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
        }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        self.slots[slot].entry.as_ref().map(|(_, value)| value.clone())
    }

    fn peek(&self, key: &K) -> Option<V> {
        let slot = *self.index.get(key)?;
        self.slots[slot].entry.as_ref().map(|(_, value)| value.clone())
    }

    fn promote(&mut self, slot: usize) {
        if self.head != slot {
            self.detach(slot);
            self.attach_front(slot);
        }
    }

    fn allocate(&mut self, key: K, value: V) -> usize {
        let slot = Slot {
            entry: Some((key, value)),
            prev: NIL,
            next: NIL,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) -> Option<(K, V)> {
        self.detach(slot);
        let entry = self.slots[slot].entry.take();
        if let Some((key, _)) = &entry {
            self.index.remove(key);
        }
        self.free.push(slot);
        entry
    }

    fn pop_lru(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        self.release(self.tail)
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);

        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }

        self.slots[slot].prev = NIL;
        self.slots[slot].next = NIL;
    }

    fn attach_front(&mut self, slot: usize) {
        self.slots[slot].prev = NIL;
        self.slots[slot].next = self.head;

        if self.head == NIL {
            self.tail = slot;
        } else {
            self.slots[self.head].prev = slot;
        }
        self.head = slot;
    }
}
