//! In-memory LRU image cache implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use parking_lot::Mutex;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;

use super::sized_lru::SizedLru;

/// Fraction of the process memory budget given to decoded images.
pub const MEMORY_BUDGET_DIVISOR: u64 = 8;

/// Capacity used when the memory budget cannot be determined.
pub const FALLBACK_CAPACITY: usize = 64 * 1024 * 1024;

/// Size of a decoded image in bytes.
#[must_use]
pub fn decoded_size(image: &Arc<DynamicImage>) -> usize {
    image.as_bytes().len()
}

/// Returns one eighth of the memory this process may use, in bytes.
///
/// The cgroup limit wins over physical memory when one is set.
#[must_use]
pub fn default_capacity() -> usize {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
    );

    let physical = system.total_memory();
    let limit = system
        .cgroup_limits()
        .map(|limits| limits.total_memory)
        .filter(|&total| total > 0)
        .map_or(physical, |total| if physical == 0 { total } else { total.min(physical) });

    let budget = limit / MEMORY_BUDGET_DIVISOR;
    if budget == 0 {
        return FALLBACK_CAPACITY;
    }
    usize::try_from(budget).unwrap_or(usize::MAX)
}

/// In-memory cache for decoded images, bounded by decoded byte size.
/// Thread-safe; the lock is never held across an await point.
pub struct MemoryImageCache {
    cache: Mutex<SizedLru<CacheKey, Arc<DynamicImage>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache holding at most `capacity` bytes of pixels.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(SizedLru::new(capacity, decoded_size)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache sized from the process memory budget.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(default_capacity())
    }

    /// Looks up an image, refreshing its recency on a hit.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let found = self.cache.lock().get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
        }
        found
    }

    /// Peeks at an image without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        self.cache.lock().peek(key).cloned()
    }

    /// Stores an image, evicting least recently used images as needed.
    pub fn put(&self, key: CacheKey, image: Arc<DynamicImage>) {
        let size = decoded_size(&image);
        let mut cache = self.cache.lock();
        if size > cache.capacity() {
            debug!(
                key = %key,
                size,
                capacity = cache.capacity(),
                "Image larger than memory cache, not stored"
            );
        } else {
            debug!(key = %key, size, "Storing image in memory cache");
        }

        for (evicted, _) in cache.put(key, image) {
            debug!(key = %evicted, "Evicted image from memory cache");
        }
    }

    /// Returns true if the key is resident. Does not touch recency or stats.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.lock().contains(key)
    }

    /// Removes an image from the cache.
    pub fn evict(&self, key: &CacheKey) {
        if self.cache.lock().remove(key).is_some() {
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    /// Removes every image.
    pub fn clear(&self) {
        self.cache.lock().clear();
        debug!("Cleared memory image cache");
    }

    /// Number of cached images.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns true if no images are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of decoded pixels currently held.
    pub fn total_size(&self) -> usize {
        self.cache.lock().total_size()
    }

    /// Maximum bytes of decoded pixels.
    pub fn capacity(&self) -> usize {
        self.cache.lock().capacity()
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let cache = self.cache.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: cache.len(),
            bytes: cache.total_size(),
            capacity: cache.capacity(),
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Bytes of decoded pixels held.
    pub bytes: usize,
    /// Maximum bytes of decoded pixels.
    pub capacity: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {}/{} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.bytes, self.capacity, self.hit_rate, self.hits, self.misses
        )
    }
}
