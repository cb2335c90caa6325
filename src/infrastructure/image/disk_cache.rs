//! Disk-based image cache for persistence across sessions.
//!
//! One file per key, named exactly by the key, holding encoded image bytes.
//! There is no index: presence of the file is presence of the entry.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::ports::{CacheError, CacheResult};

/// Prefix of in-progress write files. Keys never start with a dot.
const TEMP_PREFIX: &str = ".pixcache-";

/// Disk-based image cache that persists encoded image bytes.
///
/// Unbounded unless a `max_size` is given, in which case the least recently
/// accessed files are swept once the tracked size exceeds it.
#[derive(Debug)]
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: Option<u64>,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl DiskImageCache {
    /// Opens a disk cache rooted at `cache_dir`.
    ///
    /// The directory is not created until the first write. If it already
    /// exists its contents are counted and stale temporary files removed.
    pub async fn new(cache_dir: PathBuf, max_size: Option<u64>) -> Self {
        let mut total_size = 0u64;
        let mut count = 0usize;

        if let Ok(mut entries) = fs::read_dir(&cache_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if is_temp_file(&path) {
                    if let Err(e) = fs::remove_file(&path).await {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to remove stale temp file"
                        );
                    }
                    continue;
                }
                if let Ok(meta) = entry.metadata().await
                    && meta.is_file()
                {
                    total_size += meta.len();
                    count += 1;
                }
            }
        }

        debug!(
            dir = %cache_dir.display(),
            files = count,
            bytes = total_size,
            "Opened disk image cache"
        );

        let cache = Self {
            cache_dir,
            max_size,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
        };

        cache.cleanup_if_needed().await;

        cache
    }

    /// Directory holding the cache files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path for a cached image.
    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.as_str())
    }

    /// Checks if an image is cached.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        fs::metadata(self.cache_path(key))
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    /// Reads the encoded bytes stored for `key`.
    pub async fn read(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.cache_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Some(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "Disk cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read disk cache entry");
                None
            }
        }
    }

    /// Stores encoded bytes for `key`.
    ///
    /// The bytes go to a temporary file in the cache directory which is then
    /// renamed over the destination, so a concurrent reader sees either the
    /// previous file, no file, or the complete new file.
    ///
    /// # Errors
    /// Returns `IoError` if the directory or file cannot be written.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> CacheResult<()> {
        let path = self.cache_path(key);
        let dir = self.cache_dir.clone();
        let dest = path.clone();
        let data = bytes.to_vec();

        let old_size = tokio::task::spawn_blocking(move || write_atomic(&dir, &dest, &data))
            .await??;

        let new_size = bytes.len() as u64;
        if let Some(old) = old_size {
            if new_size > old {
                self.current_size
                    .fetch_add(new_size - old, Ordering::Relaxed);
            } else {
                saturating_sub(&self.current_size, old - new_size);
            }
        } else {
            self.current_size.fetch_add(new_size, Ordering::Relaxed);
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            key = %key,
            path = %path.display(),
            size = bytes.len(),
            "Stored image in disk cache"
        );

        self.cleanup_if_needed().await;

        Ok(())
    }

    /// Removes an image from disk cache.
    pub async fn remove(&self, key: &CacheKey) {
        let path = self.cache_path(key);
        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to remove from disk cache");
            }
        } else if let Some(s) = size {
            saturating_sub(&self.current_size, s);
            saturating_dec(&self.item_count, 1);
            debug!(key = %key, "Removed from disk cache");
        }
    }

    /// Clears the entire disk cache.
    ///
    /// # Errors
    /// Returns error if the cache directory exists but cannot be read.
    pub async fn clear(&self) -> CacheResult<()> {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(CacheError::IoError(format!(
                    "Failed to read cache dir: {e}"
                )));
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read entry: {e}")))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if is_file && fs::remove_file(&path).await.is_err() {
                warn!(path = %path.display(), "Failed to remove cache file");
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Returns the tracked cache size in bytes.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Returns the number of cached files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes least recently accessed files while over the size cap.
    async fn cleanup_if_needed(&self) {
        let Some(max_size) = self.max_size else {
            return;
        };
        let current_size = self.current_size();
        if current_size <= max_size {
            return;
        }

        debug!(
            current_size = current_size,
            max_size = max_size,
            "Disk cache over limit, cleaning up"
        );

        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return;
        };

        let mut files: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if is_temp_file(&path) {
                continue;
            }

            if let Ok(meta) = entry.metadata().await
                && meta.is_file()
            {
                let accessed = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                files.push((path, accessed, meta.len()));
            }
        }

        files.sort_by_key(|(_, time, _)| *time);

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        let target = current_size - max_size + (max_size / 10);

        for (path, _, size) in files {
            if freed_size >= target {
                break;
            }

            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
            } else {
                debug!(path = %path.display(), "Removed old cache file");
                freed_size += size;
                freed_count += 1;
            }
        }
        saturating_sub(&self.current_size, freed_size);
        saturating_dec(&self.item_count, freed_count);

        debug!(
            freed_size = freed_size,
            freed_count = freed_count,
            "Disk cache cleanup complete"
        );
    }
}

/// Writes `data` to `dest` through a temp file in `dir`.
/// Returns the size of the file that was replaced, if any.
fn write_atomic(dir: &Path, dest: &Path, data: &[u8]) -> CacheResult<Option<u64>> {
    std::fs::create_dir_all(dir)
        .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;

    let old_size = std::fs::metadata(dest).map(|m| m.len()).ok();

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| CacheError::IoError(format!("Failed to create temp file: {e}")))?;

    tmp.write_all(data)
        .map_err(|e| CacheError::IoError(format!("Failed to write cache file: {e}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| CacheError::IoError(format!("Failed to flush cache file: {e}")))?;

    tmp.persist(dest)
        .map_err(|e| CacheError::IoError(format!("Failed to persist cache file: {}", e.error)))?;

    Ok(old_size)
}

/// Counters track what this instance saw. Other writers sharing the
/// directory can make them drift low, never below zero.
fn saturating_sub(counter: &AtomicU64, amount: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(amount))
    });
}

fn saturating_dec(counter: &AtomicUsize, amount: usize) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(amount))
    });
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(TEMP_PREFIX))
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "pixcache", "pixcache").map_or_else(
        || {
            std::env::temp_dir()
                .join("pixcache")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}
