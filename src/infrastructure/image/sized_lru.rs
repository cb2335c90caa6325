//! Byte-budgeted LRU container.

use std::hash::Hash;

use lru::LruCache;

type SizeFn<V> = Box<dyn Fn(&V) -> usize + Send + Sync>;

/// LRU map that evicts by total entry size rather than entry count.
///
/// The size of each value is computed once on insertion by the function
/// supplied at construction. After every operation `total_size() <= capacity()`.
pub struct SizedLru<K: Hash + Eq, V> {
    entries: LruCache<K, (V, usize)>,
    size_of: SizeFn<V>,
    capacity: usize,
    total_size: usize,
}

impl<K: Hash + Eq, V> SizedLru<K, V> {
    /// Creates an empty container holding at most `capacity` size units.
    pub fn new(capacity: usize, size_of: impl Fn(&V) -> usize + Send + Sync + 'static) -> Self {
        Self {
            entries: LruCache::unbounded(),
            size_of: Box::new(size_of),
            capacity,
            total_size: 0,
        }
    }

    /// Returns the value for `key`, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Returns the value for `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.peek(key).map(|(value, _)| value)
    }

    /// Returns true if `key` is present. Does not touch recency.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Inserts `value`, evicting least recently used entries until the total
    /// fits. Returns the evicted `(key, value)` pairs, oldest first.
    ///
    /// A value larger than the whole capacity is not stored; any previous
    /// value under `key` is dropped and nothing else is evicted.
    pub fn put(&mut self, key: K, value: V) -> Vec<(K, V)> {
        let size = (self.size_of)(&value);

        if let Some((_, old_size)) = self.entries.pop(&key) {
            self.total_size -= old_size;
        }

        if size > self.capacity {
            return Vec::new();
        }

        self.total_size += size;
        self.entries.put(key, (value, size));

        let mut evicted = Vec::new();
        while self.total_size > self.capacity {
            let Some((old_key, (old_value, old_size))) = self.entries.pop_lru() else {
                break;
            };
            self.total_size -= old_size;
            evicted.push((old_key, old_value));
        }
        evicted
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, size) = self.entries.pop(key)?;
        self.total_size -= size;
        Some(value)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_size = 0;
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the sizes of all entries.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Maximum total size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for SizedLru<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizedLru")
            .field("len", &self.entries.len())
            .field("total_size", &self.total_size)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
